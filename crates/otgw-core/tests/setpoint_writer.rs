//! ---
//! otgw_section: "01-core-functionality"
//! otgw_subsection: "tests"
//! otgw_type: "source"
//! otgw_scope: "code"
//! otgw_description: "Write-then-verify protocol with settle delay and backoff."
//! otgw_version: "v0.0.0-prealpha"
//! otgw_owner: "tbd"
//! ---
use std::cell::Cell;
use std::sync::Arc;

use otgw_common::ManualClock;
use otgw_core::{SetpointWriter, WriteOutcome, WriterSettings};
use otgw_proto::{DataId, MessageType};
use otgw_sim::ScriptedMaster;

fn writer() -> (SetpointWriter, Arc<ScriptedMaster>, Arc<ManualClock>) {
    let master = Arc::new(ScriptedMaster::new());
    let clock = Arc::new(ManualClock::starting_at(10_000));
    let writer = SetpointWriter::new(master.clone(), clock.clone(), WriterSettings::default());
    (writer, master, clock)
}

#[test]
fn verification_retries_with_backoff_and_reports_clamp() {
    let (writer, master, clock) = writer();
    master
        .push_write_ack(DataId::TdhwSet, 21.0)
        .push_data_invalid(DataId::TdhwSet)
        .push_data_invalid(DataId::TdhwSet)
        .push_read_ack(DataId::TdhwSet, 22.5);

    let confirmed = Cell::new(None);
    let outcome = writer.write_and_verify(21.0, DataId::TdhwSet, DataId::TdhwSet, |value| {
        confirmed.set(Some(value))
    });

    assert_eq!(
        outcome,
        WriteOutcome::Confirmed {
            value: 22.5,
            clamped: true
        }
    );
    assert!(outcome.is_success());
    assert_eq!(confirmed.get(), Some(22.5));
    // settle, then backoff between the three read-backs
    assert_eq!(clock.total_slept(), 100 + 50 + 100);

    let sent = master.sent();
    assert_eq!(sent.len(), 4);
    assert_eq!(sent[0].message_type(), MessageType::WriteData);
    assert_eq!(sent[0].get_float(), 21.0);
    assert!(sent[1..]
        .iter()
        .all(|frame| frame.message_type() == MessageType::ReadData));
}

#[test]
fn first_read_back_confirms_without_backoff() {
    let (writer, master, clock) = writer();
    master
        .push_write_ack(DataId::TdhwSet, 50.5)
        .push_read_ack(DataId::TdhwSet, 50.5);

    let outcome = writer.write_and_verify(50.5, DataId::TdhwSet, DataId::TdhwSet, |_| {});
    assert_eq!(
        outcome,
        WriteOutcome::Confirmed {
            value: 50.5,
            clamped: false
        }
    );
    assert_eq!(clock.total_slept(), 100);
}

#[test]
fn rejected_write_is_not_verified() {
    let (writer, master, clock) = writer();
    master.push_data_invalid(DataId::TdhwSet);

    let called = Cell::new(false);
    let outcome = writer.write_and_verify(55.0, DataId::TdhwSet, DataId::TdhwSet, |_| {
        called.set(true)
    });

    assert_eq!(outcome, WriteOutcome::Rejected);
    assert!(!outcome.is_success());
    assert!(!called.get());
    assert_eq!(clock.total_slept(), 0);
    assert_eq!(master.sent().len(), 1);
}

#[test]
fn acknowledged_write_without_read_back_still_succeeds() {
    let (writer, master, clock) = writer();
    master.push_write_ack(DataId::TdhwSet, 45.0);

    let outcome = writer.write_and_verify(45.0, DataId::TdhwSet, DataId::TdhwSet, |_| {});
    assert_eq!(outcome, WriteOutcome::Unverified);
    assert!(outcome.is_success());
    assert_eq!(master.sent().len(), 4);
    assert_eq!(clock.total_slept(), 250);
}

#[test]
fn write_only_sends_a_single_frame() {
    let (writer, master, clock) = writer();
    master.push_write_ack(DataId::TrSet, 21.0);

    assert!(writer.write_only(21.0, DataId::TrSet));
    let sent = master.sent_for(DataId::TrSet);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].get_float(), 21.0);
    assert_eq!(clock.total_slept(), 0);

    assert!(!writer.write_only(21.0, DataId::TrSet));
}
