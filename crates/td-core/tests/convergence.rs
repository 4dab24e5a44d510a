//! Replicas converge after sync no matter how concurrent edits interleave.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use std::sync::Arc;
use td_core::db::issues;
use td_core::model::{Issue, IssuePatch};
use td_core::mutation::issues::{self as mi, NewIssue};
use td_core::sync::{MemoryServer, SyncConfig, SyncEngine};
use td_core::time::FixedClock;
use td_core::{MutationContext, Store};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

fn ctx(session: &str, secs: i64) -> MutationContext {
    MutationContext::new(session).with_clock(Arc::new(FixedClock(at(secs))))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Labels,
}

#[derive(Debug, Clone)]
struct Edit {
    replica: usize,
    field: Field,
}

fn arb_edits() -> impl Strategy<Value = Vec<Edit>> {
    prop::collection::vec(
        (0..3usize, prop_oneof![Just(Field::Title), Just(Field::Labels)])
            .prop_map(|(replica, field)| Edit { replica, field }),
        1..12,
    )
}

/// Distinct timestamps for each edit, increasing within each replica.
fn stamp(edits: &[Edit], order: &[usize]) -> Vec<i64> {
    let mut times: Vec<i64> = order.iter().map(|t| (*t as i64 + 1) * 10).collect();
    for replica in 0..3 {
        let slots: Vec<usize> = (0..edits.len()).filter(|i| edits[*i].replica == replica).collect();
        let mut mine: Vec<i64> = slots.iter().map(|i| times[*i]).collect();
        mine.sort_unstable();
        for (slot, t) in slots.into_iter().zip(mine) {
            times[slot] = t;
        }
    }
    times
}

fn patch(field: Field, n: usize) -> IssuePatch {
    match field {
        Field::Title => IssuePatch {
            title: Some(format!("title {n}")),
            ..IssuePatch::default()
        },
        Field::Labels => IssuePatch {
            labels: Some(vec![format!("l{n}")]),
            ..IssuePatch::default()
        },
    }
}

fn sync_all(engines: &[SyncEngine<'_, MemoryServer>]) {
    for e in engines {
        e.push().unwrap();
    }
    for e in engines {
        e.pull().unwrap();
    }
}

fn edits_and_order() -> impl Strategy<Value = (Vec<Edit>, Vec<usize>)> {
    arb_edits().prop_flat_map(|edits| {
        let n = edits.len();
        (Just(edits), Just((0..n).collect::<Vec<_>>()).prop_shuffle())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn replicas_agree_on_latest_write_per_field((edits, order) in edits_and_order()) {
        let server = MemoryServer::new();
        let stores: Vec<Store> = (0..3).map(|_| Store::open_in_memory().unwrap()).collect();
        let engines: Vec<SyncEngine<'_, MemoryServer>> = stores
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let config = SyncConfig::new(format!("dev-{i}"), "proj", format!("ses-{i}"));
                SyncEngine::new(s, &server, config).unwrap()
            })
            .collect();

        let id = mi::create(&stores[0], &ctx("ses-0", 0), NewIssue::titled("seed"))
            .unwrap()
            .value
            .id;
        sync_all(&engines);

        let times = stamp(&edits, &order);
        for (n, edit) in edits.iter().enumerate() {
            let session = format!("ses-{}", edit.replica);
            mi::update(&stores[edit.replica], &ctx(&session, times[n]), &id, patch(edit.field, n))
                .unwrap();
        }
        sync_all(&engines);
        sync_all(&engines);

        let latest = |field: Field| {
            (0..edits.len())
                .filter(|n| edits[*n].field == field)
                .max_by_key(|n| times[*n])
        };
        let views: Vec<Issue> = stores
            .iter()
            .map(|s| s.read(|conn| issues::get(conn, &id)).unwrap())
            .collect();
        for view in &views {
            prop_assert_eq!(&view.title, &views[0].title);
            prop_assert_eq!(&view.labels, &views[0].labels);
            match latest(Field::Title) {
                Some(n) => prop_assert_eq!(view.title.clone(), format!("title {n}")),
                None => prop_assert_eq!(view.title.as_str(), "seed"),
            }
            match latest(Field::Labels) {
                Some(n) => prop_assert_eq!(view.labels.clone(), vec![format!("l{n}")]),
                None => prop_assert!(view.labels.is_empty()),
            }
        }
    }
}

#[test]
fn three_replicas_share_new_issues() {
    let server = MemoryServer::new();
    let stores: Vec<Store> = (0..3).map(|_| Store::open_in_memory().unwrap()).collect();
    let engines: Vec<SyncEngine<'_, MemoryServer>> = stores
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let config = SyncConfig::new(format!("dev-{i}"), "proj", format!("ses-{i}"));
            SyncEngine::new(s, &server, config).unwrap()
        })
        .collect();
    for (i, store) in stores.iter().enumerate() {
        let session = ctx(&format!("ses-{i}"), i as i64);
        mi::create(store, &session, NewIssue::titled(format!("from {i}"))).unwrap();
    }
    sync_all(&engines);
    sync_all(&engines);

    let titles = |store: &Store| {
        let mut t: Vec<String> = store
            .read(|conn| issues::list(conn, &issues::IssueFilter::default()))
            .unwrap()
            .into_iter()
            .map(|i| i.title)
            .collect();
        t.sort();
        t
    };
    let expected = vec!["from 0".to_string(), "from 1".into(), "from 2".into()];
    for store in &stores {
        assert_eq!(titles(store), expected);
    }
    assert_eq!(server.event_count("proj"), 3);
}
