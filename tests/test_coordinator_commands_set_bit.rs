mod common;
use common::*;

use solis_bridge::coordinator::commands::set_bit::SetBit;
use solis_bridge::solis::registers::{StorageBit, REG_STORAGE_CONTROL};

#[tokio::test]
async fn happy_path() {
    common_setup();

    let mut io = FakeRegisterIo::new(&[(REG_STORAGE_CONTROL, 0b0100_0000)]);

    let subject = SetBit::new(REG_STORAGE_CONTROL, StorageBit::SelfUse.into(), true);
    assert!(subject.run(&mut io).await);

    assert_eq!(io.writes(), vec![(REG_STORAGE_CONTROL, 0b0100_0001)]);
}

#[tokio::test]
async fn clears_bit_preserving_others() {
    common_setup();

    let mut io = FakeRegisterIo::new(&[(REG_STORAGE_CONTROL, 0b0100_0011)]);

    let subject = SetBit::new(REG_STORAGE_CONTROL, StorageBit::FeedInPriority.into(), false);
    assert!(subject.run(&mut io).await);

    assert_eq!(io.register(REG_STORAGE_CONTROL), Some(0b0000_0011));
}

#[tokio::test]
async fn failed_read_writes_nothing() {
    common_setup();

    let mut io = FakeRegisterIo::new(&[(REG_STORAGE_CONTROL, 0)]);
    io.fail_reads = true;

    let subject = SetBit::new(REG_STORAGE_CONTROL, StorageBit::SelfUse.into(), true);
    assert!(!subject.run(&mut io).await);

    assert!(io.writes().is_empty());
}

#[tokio::test]
async fn failed_write_reports_failure() {
    common_setup();

    let mut io = FakeRegisterIo::new(&[(REG_STORAGE_CONTROL, 0)]);
    io.fail_writes = true;

    let subject = SetBit::new(REG_STORAGE_CONTROL, StorageBit::SelfUse.into(), true);
    assert!(!subject.run(&mut io).await);
}
