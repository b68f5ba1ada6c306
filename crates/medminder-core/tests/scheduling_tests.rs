//! Reminder expansion, dose transitions and adherence integration tests.

use chrono::{NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;

use medminder_core::db::Database;
use medminder_core::models::{AdherenceKey, DoseStatus, NewMedication, ReminderInput, TakenBy};
use medminder_core::schedule::{
    AdherenceAggregator, AdherenceEngine, Caller, DoseLedger, ScheduleError, ScheduleExpander,
};
use medminder_core::SchedulerConfig;

fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

struct Household {
    db: Database,
    caregiver: i64,
    patient: i64,
    medication: i64,
}

fn household() -> Household {
    let db = Database::open_in_memory().unwrap();
    let caregiver = db.insert_caregiver("Ada", "ada@example.com").unwrap();
    let patient = db.insert_patient(caregiver, "Grace").unwrap();
    let medication = db
        .insert_medication(patient, &NewMedication::named("Metformin").with_strength("500mg"))
        .unwrap();
    Household {
        db,
        caregiver,
        patient,
        medication,
    }
}

fn config(horizon_days: u32) -> SchedulerConfig {
    SchedulerConfig {
        horizon_days,
        ..Default::default()
    }
}

#[test]
fn test_twice_daily_schedule() {
    let h = household();
    let engine = AdherenceEngine::with_config(&h.db, config(7));

    let definition = engine
        .define_reminders_at(
            Caller::Caregiver(h.caregiver),
            h.medication,
            &[ReminderInput::at("evening", "20:00"), ReminderInput::at("morning", "08:00")],
            ts("2026-03-01 06:00:00"),
        )
        .unwrap();

    assert!(definition.expansions.iter().all(|e| e.is_complete()));
    assert_eq!(definition.expansions.iter().map(|e| e.created.len()).sum::<usize>(), 14);

    // Listed by time of day regardless of input order
    let listed = engine
        .list_reminders(Caller::Patient(h.patient), h.medication)
        .unwrap();
    let slots: Vec<_> = listed.iter().map(|r| r.time_slot.as_str()).collect();
    assert_eq!(slots, vec!["morning", "evening"]);

    let counts = h.db.count_doses_for_day(h.patient, day("2026-03-07")).unwrap();
    assert_eq!(counts.total, 2);
    assert_eq!(counts.pending, 2);
    assert_eq!(h.db.count_doses_for_day(h.patient, day("2026-03-08")).unwrap().total, 0);
}

#[test]
fn test_refresh_rolls_horizon_forward() {
    let h = household();
    let engine = AdherenceEngine::with_config(&h.db, config(3));
    let definition = engine
        .define_reminders_at(
            Caller::Caregiver(h.caregiver),
            h.medication,
            &[ReminderInput::at("morning", "08:00")],
            ts("2026-03-01 06:00:00"),
        )
        .unwrap();
    let reminder = definition.reminders[0].id;

    let reports = engine.refresh_horizons(day("2026-03-02")).unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].created.len(), 1);
    assert_eq!(reports[0].skipped, vec![day("2026-03-02"), day("2026-03-03")]);

    let dates: Vec<_> = h
        .db
        .list_doses_for_reminder(reminder)
        .unwrap()
        .into_iter()
        .map(|d| d.dose_date)
        .collect();
    assert_eq!(
        dates,
        vec![day("2026-03-01"), day("2026-03-02"), day("2026-03-03"), day("2026-03-04")]
    );
}

#[test]
fn test_inactive_medication_rejected() {
    let h = household();
    h.db.deactivate_medication(h.medication).unwrap();

    let result = AdherenceEngine::new(&h.db).define_reminders_at(
        Caller::Caregiver(h.caregiver),
        h.medication,
        &[ReminderInput::at("morning", "08:00")],
        ts("2026-03-01 06:00:00"),
    );
    assert!(matches!(result, Err(ScheduleError::Validation(_))));
}

#[test]
fn test_transition_exclusivity() {
    let h = household();
    let engine = AdherenceEngine::with_config(&h.db, config(1));
    let definition = engine
        .define_reminders_at(
            Caller::Caregiver(h.caregiver),
            h.medication,
            &[ReminderInput::at("morning", "08:00")],
            ts("2026-03-01 06:00:00"),
        )
        .unwrap();
    let dose_id = definition.expansions[0].created[0];

    engine
        .confirm_dose_at(Caller::Patient(h.patient), dose_id, TakenBy::Manual, None, ts("2026-03-01 08:03:00"))
        .unwrap();
    let before = h.db.get_dose(dose_id).unwrap().unwrap();

    let miss = engine.miss_dose_at(Caller::Caregiver(h.caregiver), dose_id, ts("2026-03-01 10:00:00"));
    let cancel = engine.cancel_dose_at(Caller::Caregiver(h.caregiver), dose_id, ts("2026-03-01 10:00:00"));

    match (miss, cancel) {
        (
            Err(ScheduleError::InvalidStateTransition { status: a, .. }),
            Err(ScheduleError::InvalidStateTransition { status: b, .. }),
        ) => {
            assert_eq!(a, DoseStatus::Taken);
            assert_eq!(b, DoseStatus::Taken);
        }
        other => panic!("expected two invalid transitions, got {:?}", other),
    }
    assert_eq!(h.db.get_dose(dose_id).unwrap().unwrap(), before);
}

#[test]
fn test_taken_then_missed_is_fifty_percent() {
    let h = household();
    let engine = AdherenceEngine::with_config(&h.db, config(1));
    let definition = engine
        .define_reminders_at(
            Caller::Caregiver(h.caregiver),
            h.medication,
            &[ReminderInput::at("morning", "08:00"), ReminderInput::at("evening", "20:00")],
            ts("2026-03-01 06:00:00"),
        )
        .unwrap();
    let morning = definition.expansions[0].created[0];
    let evening = definition.expansions[1].created[0];

    engine
        .confirm_dose_at(Caller::Patient(h.patient), morning, TakenBy::Manual, None, ts("2026-03-01 08:00:00"))
        .unwrap();
    engine
        .miss_dose_at(Caller::Caregiver(h.caregiver), evening, ts("2026-03-01 22:00:00"))
        .unwrap();

    let log = h
        .db
        .get_adherence_log(&AdherenceKey {
            patient_id: h.patient,
            medication_id: h.medication,
            date: day("2026-03-01"),
        })
        .unwrap()
        .unwrap();
    assert_eq!(log.total_doses, 2);
    assert_eq!(log.taken_doses, 1);
    assert_eq!(log.missed_doses, 1);
    assert_eq!(log.adherence_percentage, 50.0);
}

#[test]
fn test_replayed_transition_never_inflates_rollup() {
    let h = household();
    let reminder = h
        .db
        .insert_reminder(h.medication, &ReminderInput::at("morning", "08:00").validate().unwrap())
        .unwrap();
    let stored = h.db.get_reminder(reminder).unwrap().unwrap();
    let report = ScheduleExpander::new(&h.db)
        .expand_from(&stored, 1, day("2026-03-01"))
        .unwrap();

    let transition = DoseLedger::new(&h.db)
        .mark_taken_at(report.created[0], TakenBy::Manual, None, ts("2026-03-01 08:40:00"))
        .unwrap();
    let aggregator = AdherenceAggregator::new(&h.db);

    let first = aggregator.record_transition(&transition).unwrap().unwrap();
    assert_eq!(first.late_doses, 1);
    assert!(aggregator.record_transition(&transition).unwrap().is_none());
    assert!(aggregator.record_transition(&transition).unwrap().is_none());

    let log = h
        .db
        .list_adherence_logs(h.patient, day("2026-03-01"), day("2026-03-01"), None)
        .unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].total_doses, 1);
}

#[test]
fn test_file_backed_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("adherence.db");

    let dose_id = {
        let db = Database::open(&path).unwrap();
        let caregiver = db.insert_caregiver("Ada", "ada@example.com").unwrap();
        let patient = db.insert_patient(caregiver, "Grace").unwrap();
        let medication = db
            .insert_medication(patient, &NewMedication::named("Metformin"))
            .unwrap();
        let definition = AdherenceEngine::with_config(&db, config(2))
            .define_reminders_at(
                Caller::Caregiver(caregiver),
                medication,
                &[ReminderInput::at("morning", "08:00")],
                ts("2026-03-01 06:00:00"),
            )
            .unwrap();
        definition.expansions[0].created[0]
    };

    let db = Database::open(&path).unwrap();
    let dose = db.get_dose(dose_id).unwrap().unwrap();
    assert!(dose.is_pending());
    assert_eq!(dose.scheduled_time, ts("2026-03-01 08:00:00"));
}

#[test]
fn test_concurrent_confirmations_resolve_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");

    let (patient, medication, dose_id) = {
        let db = Database::open(&path).unwrap();
        let caregiver = db.insert_caregiver("Ada", "ada@example.com").unwrap();
        let patient = db.insert_patient(caregiver, "Grace").unwrap();
        let medication = db
            .insert_medication(patient, &NewMedication::named("Metformin"))
            .unwrap();
        let definition = AdherenceEngine::with_config(&db, config(1))
            .define_reminders_at(
                Caller::Caregiver(caregiver),
                medication,
                &[ReminderInput::at("morning", "08:00")],
                ts("2026-03-01 06:00:00"),
            )
            .unwrap();
        (patient, medication, definition.expansions[0].created[0])
    };

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let db = Database::open(&path).unwrap();
                let engine = AdherenceEngine::new(&db);
                barrier.wait();
                engine
                    .confirm_dose_at(
                        Caller::Patient(patient),
                        dose_id,
                        TakenBy::Manual,
                        None,
                        ts("2026-03-01 08:05:00"),
                    )
                    .map(|c| c.transition.dose_id)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let confirmed = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(ScheduleError::InvalidStateTransition {
                    status: DoseStatus::Taken,
                    ..
                })
            )
        })
        .count();
    assert_eq!((confirmed, rejected), (1, 1), "{:?}", results);

    let db = Database::open(&path).unwrap();
    let log = db
        .get_adherence_log(&AdherenceKey {
            patient_id: patient,
            medication_id: medication,
            date: day("2026-03-01"),
        })
        .unwrap()
        .unwrap();
    assert_eq!(log.total_doses, 1);
    assert_eq!(log.taken_doses, 1);
}

proptest! {
    #[test]
    fn prop_expansion_is_idempotent(horizon in 1u32..45, repeats in 1usize..4, hour in 0u32..24) {
        let h = household();
        let time = format!("{:02}:30", hour);
        let reminder = h
            .db
            .insert_reminder(h.medication, &ReminderInput::at("slot", time).validate().unwrap())
            .unwrap();
        let stored = h.db.get_reminder(reminder).unwrap().unwrap();
        let expander = ScheduleExpander::new(&h.db);

        let first = expander.expand_from(&stored, horizon, day("2026-02-20")).unwrap();
        prop_assert_eq!(first.created.len(), horizon as usize);
        let rows = h.db.list_doses_for_reminder(reminder).unwrap();

        for _ in 0..repeats {
            let again = expander.expand_from(&stored, horizon, day("2026-02-20")).unwrap();
            prop_assert!(again.created.is_empty());
            prop_assert_eq!(again.skipped.len(), horizon as usize);
        }
        let after = h.db.list_doses_for_reminder(reminder).unwrap();
        prop_assert_eq!(&after, &rows);

        // One dose per calendar day
        let mut dates: Vec<_> = after.iter().map(|d| d.dose_date).collect();
        dates.dedup();
        prop_assert_eq!(dates.len(), after.len());
    }
}
