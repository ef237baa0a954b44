use crate::prelude::*;
use crate::solis::modbus::RegisterIo;
use crate::solis::registers::{
    set_bit, HybridBit, StorageBit, REG_HYBRID_CONTROL, REG_STORAGE_CONTROL,
};

/// Preset: self-use, no export. Use all solar for load and battery.
///
/// Sets Self-Use on (43110.0), Feed-in off (43110.6), Allow-export off
/// (43483.3) over one connection. Reports success only when every
/// sub-write succeeded; earlier sub-writes are not rolled back on a
/// later failure, the protocol has no transaction to roll back with.
pub struct UseAllSolar;

impl UseAllSolar {
    pub async fn run<T: RegisterIo + Send>(io: &mut T) -> bool {
        let mut ok = true;

        match io.read_holding(REG_STORAGE_CONTROL).await {
            Some(current) => {
                let value = set_bit(current, StorageBit::SelfUse.into(), true);
                let value = set_bit(value, StorageBit::FeedInPriority.into(), false);
                ok = io.write_holding(REG_STORAGE_CONTROL, value).await && ok;
            }
            None => ok = false,
        }

        match io.read_holding(REG_HYBRID_CONTROL).await {
            Some(current) => {
                let value = set_bit(current, HybridBit::AllowExport.into(), false);
                ok = io.write_holding(REG_HYBRID_CONTROL, value).await && ok;
            }
            None => ok = false,
        }

        if ok {
            info!("use_all_solar preset applied");
        } else {
            warn!("use_all_solar preset failed (no rollback of partial writes)");
        }
        ok
    }
}
