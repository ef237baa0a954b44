//! Solis S6 register map: block layout, bitfields and the pure decoder
//! that turns raw register blocks into a [`DeviceSnapshot`].
//!
//! Register numbers follow the vendor documentation (input 33xxx,
//! holding 43xxx). All decoding is total: a missing or short block
//! degrades the fields it backs to their defaults, never the whole
//! snapshot.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;
use std::collections::HashMap;

/// Input register blocks read on every poll, in read order.
pub const INPUT_BLOCKS: [(u16, u16); 5] = [
    (33000, 41), // product, serial, time, energy totals
    (33049, 36), // DC/AC voltages, currents, power
    (33091, 5),  // working mode, temp, grid freq, inverter state
    (33126, 24), // meter power, battery V/I/SOC, house load, battery power
    (33161, 20), // battery charge/discharge energy, grid import/export, load
];

/// Storage mode control bits (read/write).
pub const REG_STORAGE_CONTROL: u16 = 43110;
/// Hybrid function control bits: export, peak-shaving, etc (read/write).
pub const REG_HYBRID_CONTROL: u16 = 43483;
/// Read-only mirror of 43110 inside the battery/meter input block.
const STORAGE_CONTROL_MIRROR_OFFSET: usize = 6; // 33132

/// Raw register blocks keyed by start address.
pub type Blocks = HashMap<u16, Vec<u16>>;

// Control bits {{{

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum StorageBit {
    SelfUse = 0,
    TimeOfUse = 1,
    OffGrid = 2,
    BatteryWakeup = 3,
    ReserveBattery = 4,
    AllowGridCharge = 5,
    FeedInPriority = 6,
    BattOvc = 7,
    ForcechargePeakshaving = 8,
    BatteryCurrentCorrection = 9,
    BatteryHealing = 10,
    PeakShaving = 11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum HybridBit {
    DualBackup = 0,
    AcCoupling = 1,
    SmartLoadForced = 2,
    AllowExport = 3,
    Backup2LoadAuto = 4,
    Backup2LoadManual = 5,
    SmartLoadOffgridStop = 6,
    GridPeakshaving = 7,
}

/// Set or clear one bit of a 16-bit register value.
pub fn set_bit(value: u16, bit: u8, on: bool) -> u16 {
    if on {
        value | (1 << bit)
    } else {
        value & !(1 << bit)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageBits {
    pub self_use: bool,
    pub time_of_use: bool,
    pub off_grid: bool,
    pub battery_wakeup: bool,
    pub reserve_battery: bool,
    pub allow_grid_charge: bool,
    pub feed_in_priority: bool,
    pub batt_ovc: bool,
    pub forcecharge_peakshaving: bool,
    pub battery_current_correction: bool,
    pub battery_healing: bool,
    pub peak_shaving: bool,
}

impl StorageBits {
    pub fn new(value: u16) -> Self {
        let bit = |i: u8| (value >> i) & 1 == 1;
        Self {
            self_use: bit(0),
            time_of_use: bit(1),
            off_grid: bit(2),
            battery_wakeup: bit(3),
            reserve_battery: bit(4),
            allow_grid_charge: bit(5),
            feed_in_priority: bit(6),
            batt_ovc: bit(7),
            forcecharge_peakshaving: bit(8),
            battery_current_correction: bit(9),
            battery_healing: bit(10),
            peak_shaving: bit(11),
        }
    }

    /// Re-encode the named bits. Bits above 11 are not represented here
    /// and so never appear in the result.
    pub fn as_u16(&self) -> u16 {
        let bit = |on: bool, i: u8| (on as u16) << i;
        bit(self.self_use, 0)
            | bit(self.time_of_use, 1)
            | bit(self.off_grid, 2)
            | bit(self.battery_wakeup, 3)
            | bit(self.reserve_battery, 4)
            | bit(self.allow_grid_charge, 5)
            | bit(self.feed_in_priority, 6)
            | bit(self.batt_ovc, 7)
            | bit(self.forcecharge_peakshaving, 8)
            | bit(self.battery_current_correction, 9)
            | bit(self.battery_healing, 10)
            | bit(self.peak_shaving, 11)
    }

    pub fn get(&self, bit: StorageBit) -> bool {
        (self.as_u16() >> bit as u8) & 1 == 1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HybridBits {
    pub dual_backup: bool,
    pub ac_coupling: bool,
    pub smart_load_forced: bool,
    pub allow_export: bool,
    pub backup2load_auto: bool,
    pub backup2load_manual: bool,
    pub smart_load_offgrid_stop: bool,
    pub grid_peakshaving: bool,
}

impl HybridBits {
    pub fn new(value: u16) -> Self {
        let bit = |i: u8| (value >> i) & 1 == 1;
        Self {
            dual_backup: bit(0),
            ac_coupling: bit(1),
            smart_load_forced: bit(2),
            allow_export: bit(3),
            backup2load_auto: bit(4),
            backup2load_manual: bit(5),
            smart_load_offgrid_stop: bit(6),
            grid_peakshaving: bit(7),
        }
    }

    pub fn as_u16(&self) -> u16 {
        let bit = |on: bool, i: u8| (on as u16) << i;
        bit(self.dual_backup, 0)
            | bit(self.ac_coupling, 1)
            | bit(self.smart_load_forced, 2)
            | bit(self.allow_export, 3)
            | bit(self.backup2load_auto, 4)
            | bit(self.backup2load_manual, 5)
            | bit(self.smart_load_offgrid_stop, 6)
            | bit(self.grid_peakshaving, 7)
    }

    pub fn get(&self, bit: HybridBit) -> bool {
        (self.as_u16() >> bit as u8) & 1 == 1
    }
} // }}}

// DeviceSnapshot {{{

/// Flat sensor view of one poll. Every field is always present so the
/// published shape never shrinks; fields whose source block failed to
/// read stay at their defaults. Serialized names keep the wire names
/// the dashboard and MQTT consumers already use.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub ok: bool,

    #[serde(rename = "grid_power_W")]
    pub grid_power_w: i64,
    #[serde(rename = "load_power_W")]
    pub load_power_w: i64,
    #[serde(rename = "pv_power_W")]
    pub pv_power_w: i64,
    #[serde(rename = "battery_power_W")]
    pub battery_power_w: i64,
    #[serde(rename = "meter_power_W")]
    pub meter_power_w: i64,
    #[serde(rename = "active_power_W")]
    pub active_power_w: i64,
    #[serde(rename = "house_load_W")]
    pub house_load_w: i64,

    pub battery_soc_pct: u16,
    pub battery_soh_pct: u16,
    #[serde(rename = "battery_voltage_V")]
    pub battery_voltage_v: f64,
    #[serde(rename = "battery_current_A")]
    pub battery_current_a: f64,

    #[serde(rename = "pv_voltage_1_V")]
    pub pv_voltage_1_v: f64,
    #[serde(rename = "pv_current_1_A")]
    pub pv_current_1_a: f64,
    #[serde(rename = "pv_voltage_2_V")]
    pub pv_voltage_2_v: f64,
    #[serde(rename = "pv_current_2_A")]
    pub pv_current_2_a: f64,
    #[serde(rename = "ac_voltage_V")]
    pub ac_voltage_v: f64,
    #[serde(rename = "ac_current_A")]
    pub ac_current_a: f64,

    #[serde(rename = "grid_freq_Hz")]
    pub grid_freq_hz: f64,
    #[serde(rename = "inverter_temp_C")]
    pub inverter_temp_c: f64,
    pub inverter_state: u16,
    pub product_model: u16,

    pub storage_control_raw: u16,
    pub hybrid_control_raw: u16,

    #[serde(rename = "energy_today_pv_kWh")]
    pub energy_today_pv_kwh: f64,
    #[serde(rename = "energy_today_load_kWh")]
    pub energy_today_load_kwh: f64,
    #[serde(rename = "energy_today_bat_charge_kWh")]
    pub energy_today_bat_charge_kwh: f64,
    #[serde(rename = "energy_today_bat_discharge_kWh")]
    pub energy_today_bat_discharge_kwh: f64,
    #[serde(rename = "energy_today_grid_import_kWh")]
    pub energy_today_grid_import_kwh: f64,
    #[serde(rename = "energy_today_grid_export_kWh")]
    pub energy_today_grid_export_kwh: f64,

    pub storage_bits: StorageBits,
    pub hybrid_bits: HybridBits,

    /// Diagnostic only; excluded from any published serialization.
    #[serde(skip)]
    pub raw_blocks: Blocks,
} // }}}

// Field helpers {{{

/// Single register, or 0 when the block is missing or too short.
fn reg(block: Option<&Vec<u16>>, offset: usize) -> u16 {
    match block {
        Some(values) if offset < values.len() => values[offset],
        _ => 0,
    }
}

/// 32-bit unsigned, high word first.
fn reg_u32(block: Option<&Vec<u16>>, offset: usize) -> u32 {
    match block {
        Some(values) if offset + 1 < values.len() => {
            ((values[offset] as u32) << 16) | values[offset + 1] as u32
        }
        _ => 0,
    }
}

/// 32-bit signed, high word first; negative = export / discharge.
fn reg_i32(block: Option<&Vec<u16>>, offset: usize) -> i32 {
    reg_u32(block, offset) as i32
}

fn div10(raw: u16) -> f64 {
    raw as f64 / 10.0
}

fn div100(raw: u16) -> f64 {
    raw as f64 / 100.0
} // }}}

/// Decode all register blocks into a snapshot. Total: never fails, any
/// subset of missing blocks just leaves defaults behind.
pub fn decode(blocks: &Blocks) -> DeviceSnapshot {
    let mut out = DeviceSnapshot {
        ok: !blocks.is_empty(),
        raw_blocks: blocks.clone(),
        ..Default::default()
    };

    // 33000..33040: product info and PV energy
    let b0 = blocks.get(&33000);
    out.energy_today_pv_kwh = div10(reg(b0, 35)); // 33035, 0.1 kWh
    out.product_model = reg(b0, 0);

    // 33049..33084: DC/AC electrical values
    let b1 = blocks.get(&33049);
    out.pv_power_w = reg_u32(b1, 8) as i64; // 33057-33058 total DC
    out.active_power_w = reg_i32(b1, 30) as i64; // 33079-33080, export negative
    out.pv_voltage_1_v = div10(reg(b1, 0));
    out.pv_current_1_a = div10(reg(b1, 1));
    out.pv_voltage_2_v = div10(reg(b1, 2));
    out.pv_current_2_a = div10(reg(b1, 3));
    out.ac_voltage_v = div10(reg(b1, 24)); // 33073 phase A
    out.ac_current_a = div10(reg(b1, 27)); // 33076 phase A

    // 33091..33095: temperature, frequency, state
    let b2 = blocks.get(&33091);
    out.inverter_temp_c = div10(reg(b2, 2));
    out.grid_freq_hz = div100(reg(b2, 3));
    out.inverter_state = reg(b2, 4);

    // 33126..33149: meter, battery, house load
    let b3 = blocks.get(&33126);
    out.meter_power_w = reg_i32(b3, 4) as i64; // 33130, + import / - export
    out.battery_voltage_v = div10(reg(b3, 7));
    out.battery_current_a = div10(reg(b3, 8));
    out.battery_soc_pct = reg(b3, 13);
    out.battery_soh_pct = reg(b3, 14);
    out.house_load_w = reg(b3, 21) as i64;
    out.battery_power_w = reg_i32(b3, 23) as i64; // 33149-33150, charge/discharge
    out.storage_control_raw = reg(b3, STORAGE_CONTROL_MIRROR_OFFSET); // 33132 mirror

    // Prefer the dedicated holding registers over the mirror when present
    if let Some(h) = blocks.get(&REG_STORAGE_CONTROL) {
        out.storage_control_raw = h.first().copied().unwrap_or(0);
    }
    out.hybrid_control_raw = blocks
        .get(&REG_HYBRID_CONTROL)
        .and_then(|h| h.first().copied())
        .unwrap_or(0);

    // 33161..33180: daily energy counters
    let b4 = blocks.get(&33161);
    out.energy_today_bat_charge_kwh = div10(reg(b4, 2));
    out.energy_today_bat_discharge_kwh = div10(reg(b4, 6));
    out.energy_today_grid_import_kwh = div10(reg(b4, 10));
    out.energy_today_grid_export_kwh = div10(reg(b4, 14));
    out.energy_today_load_kwh = div10(reg(b4, 18)); // 33179

    // Dashboard aliases: grid = meter (sign preserved), load = house load.
    out.grid_power_w = out.meter_power_w;
    out.load_power_w = out.house_load_w;

    // PV: prefer total DC power; fall back on inverter active power,
    // clamped non-negative for display.
    if out.pv_power_w == 0 && out.active_power_w != 0 {
        out.pv_power_w = out.active_power_w.max(0);
    }

    out.storage_bits = StorageBits::new(out.storage_control_raw);
    out.hybrid_bits = HybridBits::new(out.hybrid_control_raw);

    out
}
