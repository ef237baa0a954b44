//! Minimal Modbus TCP client for the Solis S6 datalogger.
//!
//! Connection handling is deliberately simple: every public read/write
//! opens a fresh connection, performs its requests and drops the socket.
//! The datalogger is effectively single-client, so there is nothing to
//! gain from pooling and a stale half-open connection is the main
//! failure mode we want to avoid.
//!
//! The datalogger frequently does not echo the MBAP transaction ID back
//! in responses. With `strict_transaction_id` off (the default for this
//! device) any transaction ID is accepted on an otherwise well-formed
//! response and the mismatch is logged at debug level; strict mode keeps
//! the normal check for devices that behave.

use crate::prelude::*;

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const MBAP_HEADER_LEN: usize = 7;
const PROTOCOL_ID: u16 = 0;

// Solis doc register numbers are sent as-is by default; zero-based mode
// subtracts the classic table bases instead.
const INPUT_BASE: u16 = 30001;
const HOLDING_BASE: u16 = 40001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    ReadHolding = 0x03,
    ReadInput = 0x04,
    WriteSingle = 0x06,
}

/// Single-register access used by the control-bit commands, so tests can
/// substitute a fake for the live session.
#[async_trait]
pub trait RegisterIo {
    async fn read_holding(&mut self, register: u16) -> Option<u16>;
    async fn write_holding(&mut self, register: u16, value: u16) -> bool;
}

// Frame build/parse {{{

/// MBAP header + PDU for one request.
pub fn build_request(
    transaction_id: u16,
    unit_id: u8,
    function: FunctionCode,
    address: u16,
    word: u16,
) -> BytesMut {
    let mut frame = BytesMut::with_capacity(12);
    frame.put_u16(transaction_id);
    frame.put_u16(PROTOCOL_ID);
    frame.put_u16(6); // unit id + function + 4 data bytes
    frame.put_u8(unit_id);
    frame.put_u8(function.into());
    frame.put_u16(address);
    frame.put_u16(word);
    frame
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

pub fn parse_mbap_header(raw: &[u8; MBAP_HEADER_LEN]) -> MbapHeader {
    let mut buf = &raw[..];
    MbapHeader {
        transaction_id: buf.get_u16(),
        protocol_id: buf.get_u16(),
        length: buf.get_u16(),
        unit_id: buf.get_u8(),
    }
}

/// Parse the PDU of a response to `function`. Reads yield the register
/// values; a write echo yields the single written value.
pub fn parse_pdu(function: FunctionCode, pdu: &[u8]) -> Result<Vec<u16>> {
    let mut buf = pdu;
    if buf.remaining() < 1 {
        bail!("empty response PDU");
    }

    let code = buf.get_u8();
    if code == u8::from(function) | 0x80 {
        if buf.remaining() < 1 {
            bail!("exception response with no exception code");
        }
        bail!("modbus exception {:#04x}", buf.get_u8());
    }
    if code != u8::from(function) {
        bail!("unexpected function code {:#04x} in response", code);
    }

    match function {
        FunctionCode::ReadHolding | FunctionCode::ReadInput => {
            if buf.remaining() < 1 {
                bail!("read response missing byte count");
            }
            let byte_count = buf.get_u8() as usize;
            if byte_count % 2 != 0 || buf.remaining() < byte_count {
                bail!(
                    "short read response: byte count {} with {} bytes left",
                    byte_count,
                    buf.remaining()
                );
            }
            let mut values = Vec::with_capacity(byte_count / 2);
            for _ in 0..byte_count / 2 {
                values.push(buf.get_u16());
            }
            Ok(values)
        }
        FunctionCode::WriteSingle => {
            if buf.remaining() < 4 {
                bail!("short write echo");
            }
            let _address = buf.get_u16();
            Ok(vec![buf.get_u16()])
        }
    }
} // }}}

#[derive(Clone, Debug)]
pub struct ModbusClient {
    host: String,
    port: u16,
    unit_id: u8,
    timeout: Duration,
    zero_based: bool,
    strict_transaction_id: bool,
}

impl ModbusClient {
    pub fn new(inverter: &config::Inverter) -> Self {
        Self {
            host: inverter.host().to_string(),
            port: inverter.port(),
            unit_id: inverter.unit_id(),
            timeout: inverter.timeout(),
            zero_based: inverter.zero_based_addressing(),
            strict_transaction_id: inverter.strict_transaction_id(),
        }
    }

    /// Open a connection for a compound operation (preset, read-modify-
    /// write). The session is dropped, and the socket with it, when the
    /// caller is done.
    pub async fn connect(&self) -> Result<Session> {
        let stream = tokio::time::timeout(
            self.timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| anyhow!("connect to {}:{} timed out", self.host, self.port))?
        .map_err(|e| anyhow!("connect to {}:{}: {}", self.host, self.port, e))?;

        Ok(Session {
            stream,
            unit_id: self.unit_id,
            timeout: self.timeout,
            zero_based: self.zero_based,
            strict_transaction_id: self.strict_transaction_id,
            next_transaction_id: 1,
        })
    }

    /// Read one input register block; any failure is reported as absent.
    pub async fn read_input_block(&self, register: u16, count: u16) -> Option<Vec<u16>> {
        let result = async {
            let mut session = self.connect().await?;
            session.read_input_registers(register, count).await
        }
        .await;

        match result {
            Ok(values) => Some(values),
            Err(e) => {
                warn!("read_input_block {} {}: {}", register, count, e);
                None
            }
        }
    }

    /// Read one holding register block; any failure is reported as absent.
    pub async fn read_holding_block(&self, register: u16, count: u16) -> Option<Vec<u16>> {
        let result = async {
            let mut session = self.connect().await?;
            session.read_holding_registers(register, count).await
        }
        .await;

        match result {
            Ok(values) => {
                debug!("read_holding {} = {:?}", register, values);
                Some(values)
            }
            Err(e) => {
                warn!("read_holding {}: {}", register, e);
                None
            }
        }
    }

    /// Write one holding register; any failure is reported as false.
    pub async fn write_holding(&self, register: u16, value: u16) -> bool {
        let result = async {
            let mut session = self.connect().await?;
            session.write_single_register(register, value).await
        }
        .await;

        match result {
            Ok(()) => {
                debug!("write_holding {}={} OK", register, value);
                true
            }
            Err(e) => {
                warn!("write_holding {}={}: {}", register, value, e);
                false
            }
        }
    }
}

/// One open connection; each request is individually bounded by the
/// per-call timeout.
pub struct Session {
    stream: TcpStream,
    unit_id: u8,
    timeout: Duration,
    zero_based: bool,
    strict_transaction_id: bool,
    next_transaction_id: u16,
}

impl Session {
    pub async fn read_input_registers(&mut self, register: u16, count: u16) -> Result<Vec<u16>> {
        let address = self.input_address(register);
        let values = self
            .request(FunctionCode::ReadInput, address, count)
            .await?;
        if values.len() != count as usize {
            bail!(
                "read_input {} returned {} registers, wanted {}",
                register,
                values.len(),
                count
            );
        }
        Ok(values)
    }

    pub async fn read_holding_registers(&mut self, register: u16, count: u16) -> Result<Vec<u16>> {
        let address = self.holding_address(register);
        let values = self
            .request(FunctionCode::ReadHolding, address, count)
            .await?;
        if values.len() != count as usize {
            bail!(
                "read_holding {} returned {} registers, wanted {}",
                register,
                values.len(),
                count
            );
        }
        Ok(values)
    }

    pub async fn write_single_register(&mut self, register: u16, value: u16) -> Result<()> {
        let address = self.holding_address(register);
        let echo = self
            .request(FunctionCode::WriteSingle, address, value)
            .await?;
        if echo.first() != Some(&value) {
            bail!(
                "write_single {} echoed {:?}, wanted {}",
                register,
                echo.first(),
                value
            );
        }
        Ok(())
    }

    async fn request(
        &mut self,
        function: FunctionCode,
        address: u16,
        word: u16,
    ) -> Result<Vec<u16>> {
        let transaction_id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);

        let frame = build_request(transaction_id, self.unit_id, function, address, word);
        tokio::time::timeout(self.timeout, self.stream.write_all(&frame))
            .await
            .map_err(|_| anyhow!("request write timed out"))??;

        let mut raw_header = [0u8; MBAP_HEADER_LEN];
        tokio::time::timeout(self.timeout, self.stream.read_exact(&mut raw_header))
            .await
            .map_err(|_| anyhow!("response timed out after {:?}", self.timeout))??;

        let header = parse_mbap_header(&raw_header);
        if header.protocol_id != PROTOCOL_ID {
            bail!("bad protocol id {} in response", header.protocol_id);
        }
        if header.unit_id != self.unit_id {
            bail!(
                "response for unit {}, expected {}",
                header.unit_id,
                self.unit_id
            );
        }
        if header.transaction_id != transaction_id {
            if self.strict_transaction_id {
                bail!(
                    "transaction id mismatch: sent {} but got {}",
                    transaction_id,
                    header.transaction_id
                );
            }
            // expected with Solis dataloggers, keep the logs clean
            debug!(
                "accepting response with transaction id {} (sent {})",
                header.transaction_id, transaction_id
            );
        }
        if header.length < 2 {
            bail!("response length {} too short", header.length);
        }

        let mut pdu = vec![0u8; header.length as usize - 1];
        tokio::time::timeout(self.timeout, self.stream.read_exact(&mut pdu))
            .await
            .map_err(|_| anyhow!("response body timed out"))??;

        parse_pdu(function, &pdu)
    }

    fn input_address(&self, register: u16) -> u16 {
        if self.zero_based {
            register - INPUT_BASE
        } else {
            register
        }
    }

    fn holding_address(&self, register: u16) -> u16 {
        if self.zero_based {
            register - HOLDING_BASE
        } else {
            register
        }
    }
}

#[async_trait]
impl RegisterIo for Session {
    async fn read_holding(&mut self, register: u16) -> Option<u16> {
        match self.read_holding_registers(register, 1).await {
            Ok(values) => values.first().copied(),
            Err(e) => {
                warn!("read_holding {}: {}", register, e);
                None
            }
        }
    }

    async fn write_holding(&mut self, register: u16, value: u16) -> bool {
        match self.write_single_register(register, value).await {
            Ok(()) => {
                debug!("write_holding {}={} OK", register, value);
                true
            }
            Err(e) => {
                warn!("write_holding {}={}: {}", register, value, e);
                false
            }
        }
    }
}
