//! Calibration dataset store.
//!
//! Reads the per-processor calibration record from calibration memory and
//! arbitrates between it and configuration-supplied overrides by bin id and
//! packed version. Calibration memory is authoritative unless a matching
//! override is strictly newer.

use std::cmp::Ordering;

use tracing::{debug, info};

use therm_common::calibration::{
    layout, BinId, CalibrationRecord, DatasetSource, PackedVersion, ProcessorVariant, RomField,
};
use therm_common::fixed::{from_byte, gain_from_be, half_from_be, word_from_be};
use therm_common::hw::CalibrationMemory;

use crate::error::DatasetError;

/// Outcome of dataset selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSelection {
    /// Authoritative record, installed as the normal meta-state.
    pub record: CalibrationRecord,
    /// Safety-monitor family, always taken from calibration memory.
    pub variant: ProcessorVariant,
}

fn read_field<const N: usize>(
    memory: &dyn CalibrationMemory,
    processor_id: u32,
    field: RomField,
) -> Result<[u8; N], DatasetError> {
    debug_assert_eq!(field.len, N, "{}", field.name);
    let mut buf = [0u8; N];
    memory
        .read(processor_id, field.offset, &mut buf)
        .map_err(|source| DatasetError::CalibrationReadFailed {
            field: field.name,
            source,
        })?;
    Ok(buf)
}

/// Read the calibration-memory record of one processor.
///
/// Any failed field read aborts the whole record.
pub fn read_rom_record(
    memory: &dyn CalibrationMemory,
    processor_id: u32,
) -> Result<CalibrationRecord, DatasetError> {
    let bin: [u8; 3] = read_field(memory, processor_id, layout::BIN_ID)?;
    let version: [u8; 4] = read_field(memory, processor_id, layout::VERSION)?;
    let g_p: [u8; 4] = read_field(memory, processor_id, layout::G_P)?;
    let g_r: [u8; 4] = read_field(memory, processor_id, layout::G_R)?;
    let g_d: [u8; 4] = read_field(memory, processor_id, layout::G_D)?;
    let out_min: [u8; 2] = read_field(memory, processor_id, layout::OUTPUT_MIN)?;
    let out_max: [u8; 2] = read_field(memory, processor_id, layout::OUTPUT_MAX)?;
    let [hist_len] = read_field(memory, processor_id, layout::HISTORY_LEN)?;
    let [target] = read_field(memory, processor_id, layout::TARGET_TEMP)?;
    let [max_temp] = read_field(memory, processor_id, layout::MAX_TEMP)?;
    let [max_power] = read_field(memory, processor_id, layout::MAX_POWER)?;
    let [power_adj] = read_field(memory, processor_id, layout::POWER_ADJUSTMENT)?;
    let [variant] = read_field(memory, processor_id, layout::PROCESSOR_VARIANT)?;

    let bin_id = BinId::from_slice(&bin).map_err(|_| DatasetError::CalibrationReadFailed {
        field: layout::BIN_ID.name,
        source: therm_common::hw::HwError::OutOfRange {
            offset: layout::BIN_ID.offset,
            len: bin.len(),
        },
    })?;

    Ok(CalibrationRecord {
        source: DatasetSource::Rom,
        bin_id,
        version: Some(PackedVersion(word_from_be(version))),
        g_p: gain_from_be(g_p),
        g_d: gain_from_be(g_d),
        g_r: gain_from_be(g_r),
        input_target: from_byte(target),
        input_max: from_byte(max_temp),
        output_min: half_from_be(out_min),
        output_max: half_from_be(out_max),
        history_len: hist_len as u32,
        max_power: from_byte(max_power),
        power_adjustment: from_byte(power_adj),
        processor_variant: Some(variant),
        interval_sec: CalibrationRecord::DEFAULT_INTERVAL_SEC,
    })
}

/// Arbitrate between the calibration-memory record and configuration candidates.
///
/// The first candidate sharing the hardware bin id is compared by version;
/// it wins only when strictly newer.
pub fn choose_dataset(
    hardware: CalibrationRecord,
    candidates: &[CalibrationRecord],
) -> Result<CalibrationRecord, DatasetError> {
    let Some(candidate) = candidates.iter().find(|c| c.bin_id == hardware.bin_id) else {
        debug!(bin_id = ?hardware.bin_id.as_slice(), "no configuration dataset matches bin id");
        return Ok(hardware);
    };

    match PackedVersion::compare(hardware.version, candidate.version)? {
        Ordering::Less => Ok(candidate.clone()),
        Ordering::Equal | Ordering::Greater => Ok(hardware),
    }
}

/// Read calibration memory and select the authoritative dataset.
pub fn select_dataset(
    memory: Option<&dyn CalibrationMemory>,
    processor_id: u32,
    candidates: &[CalibrationRecord],
) -> Result<DatasetSelection, DatasetError> {
    let memory = memory.ok_or(DatasetError::NoCalibrationData(processor_id))?;
    let hardware = read_rom_record(memory, processor_id)?;
    let variant = ProcessorVariant::from_code(hardware.processor_variant.unwrap_or_default());
    let record = choose_dataset(hardware, candidates)?;

    info!(
        processor_id,
        source = %record.source,
        version = %record.version.map(|v| v.to_string()).unwrap_or_default(),
        ?variant,
        "calibration dataset selected"
    );

    Ok(DatasetSelection { record, variant })
}
