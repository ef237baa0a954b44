use crate::solis::registers::{HybridBit, StorageBit};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetStorageBit(StorageBit, bool),
    SetHybridBit(HybridBit, bool),
    UseAllSolar,
    SetAutomationEnabled(bool),
}

impl Command {
    pub fn to_result_topic(&self) -> String {
        use Command::*;

        let rest = match self {
            SetStorageBit(bit, _) => format!("set/storage/{}", *bit as u8),
            SetHybridBit(bit, _) => format!("set/hybrid/{}", *bit as u8),
            UseAllSolar => "preset/use_all_solar".to_string(),
            SetAutomationEnabled(_) => "set/automation".to_string(),
        };

        format!("result/{}", rest)
    }
}
