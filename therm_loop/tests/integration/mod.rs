mod config_loading;
mod dataset_selection;
mod end_to_end;
mod group_reselection;
mod support;
mod thermal_runaway;
mod variant_b_hysteresis;
