use crate::prelude::*;
use crate::solis::modbus::RegisterIo;
use crate::solis::registers;

/// Read-modify-write of one bit in a control register.
///
/// There is no protocol-level atomicity: a concurrent external write
/// between our read and write is a lost update. Accepted, since this
/// bridge is expected to be the only writer. Bit range is enforced by
/// the typed bit enums before a command is ever constructed, not here.
pub struct SetBit {
    register: u16,
    bit: u8,
    enable: bool,
}

impl SetBit {
    pub fn new(register: u16, bit: u8, enable: bool) -> Self {
        Self {
            register,
            bit,
            enable,
        }
    }

    /// Returns the write's success; a failed read means no write is
    /// attempted at all.
    pub async fn run<T: RegisterIo + Send>(&self, io: &mut T) -> bool {
        let Some(current) = io.read_holding(self.register).await else {
            warn!(
                "set_bit {}:{}: read failed, not writing",
                self.register, self.bit
            );
            return false;
        };

        let new_value = registers::set_bit(current, self.bit, self.enable);
        let ok = io.write_holding(self.register, new_value).await;
        if ok {
            info!(
                "set_bit {}: bit {} {} ({} -> {})",
                self.register,
                self.bit,
                if self.enable { "on" } else { "off" },
                current,
                new_value
            );
        }
        ok
    }
}
