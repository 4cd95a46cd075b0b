// tests/webhook_guard.rs

mod common;

use chrono::TimeDelta;
use serde_json::json;

use common::Harness;
use tigris_sentinel::antinuke::webhooks::WebhookVerdict;
use tigris_sentinel::panic::PanicLevel;
use tigris_sentinel::seclog::SecurityEvent;

const G: u64 = 5;

#[tokio::test]
async fn creation_burst_is_remediated() {
    let h = Harness::new();
    h.sentinel.webhooks.warmup(G).await;
    let guard = &h.sentinel.webhooks;

    for (i, id) in [101, 102, 103].into_iter().enumerate() {
        h.platform.add_webhook(G, id);
        assert_eq!(
            guard.on_webhooks_update(G).await,
            WebhookVerdict::Reconciled { new: 1, count: i + 1 }
        );
        h.clock.advance(TimeDelta::seconds(10));
    }
    h.platform.add_webhook(G, 104);
    let verdict = guard.on_webhooks_update(G).await;

    assert_eq!(
        verdict,
        WebhookVerdict::Remediated { deleted: vec![101, 102, 103, 104], failed: vec![] }
    );
    assert!(h.platform.webhook_ids(G).is_empty());
    assert_eq!(h.sentinel.panic.get_level(G), PanicLevel::Medium);
    assert!(guard.known(G).is_empty());
    assert!(h.sentinel.log.recent(G).iter().any(|e| matches!(
        e,
        SecurityEvent::WebhookRemediation { new_webhooks: 4, .. }
    )));
}

#[tokio::test]
async fn baseline_webhooks_are_never_counted_or_deleted() {
    let h = Harness::new();
    h.platform.add_webhook(G, 1);
    h.platform.add_webhook(G, 2);

    // pierwsze zdarzenie bez warmupu zasiewa bazę
    assert_eq!(h.sentinel.webhooks.on_webhooks_update(G).await, WebhookVerdict::Seeded { known: 2 });

    for id in 10..14 {
        h.platform.add_webhook(G, id);
    }
    let verdict = h.sentinel.webhooks.on_webhooks_update(G).await;
    assert_eq!(
        verdict,
        WebhookVerdict::Remediated { deleted: vec![10, 11, 12, 13], failed: vec![] }
    );
    assert_eq!(h.platform.webhook_ids(G), vec![1, 2]);
}

#[tokio::test]
async fn slow_creations_stay_below_threshold() {
    let h = Harness::new();
    h.sentinel.webhooks.warmup(G).await;
    for id in 1..=6 {
        h.platform.add_webhook(G, id);
        let verdict = h.sentinel.webhooks.on_webhooks_update(G).await;
        assert!(matches!(verdict, WebhookVerdict::Reconciled { new: 1, .. }), "{verdict:?}");
        h.clock.advance(TimeDelta::seconds(31));
    }
    assert!(h.platform.deleted().is_empty());
    assert_eq!(h.sentinel.panic.get_level(G), PanicLevel::None);
}

#[tokio::test]
async fn vanished_webhooks_are_forgotten() {
    let h = Harness::new();
    h.sentinel.webhooks.warmup(G).await;
    h.platform.add_webhook(G, 1);
    h.sentinel.webhooks.on_webhooks_update(G).await;
    h.platform.remove_webhook(G, 1);

    assert_eq!(
        h.sentinel.webhooks.on_webhooks_update(G).await,
        WebhookVerdict::Reconciled { new: 0, count: 1 }
    );
    assert!(h.sentinel.webhooks.known(G).is_empty());
}

#[tokio::test]
async fn failed_deletes_are_reported_individually() {
    let h = Harness::new();
    h.store.seed(G, json!({ "security": { "webhooks": { "threshold": 1 } } }));
    h.sentinel.webhooks.warmup(G).await;
    h.platform.make_undeletable(7);
    h.platform.add_webhook(G, 7);
    h.platform.add_webhook(G, 8);

    let verdict = h.sentinel.webhooks.on_webhooks_update(G).await;
    assert_eq!(verdict, WebhookVerdict::Remediated { deleted: vec![8], failed: vec![7] });
    assert_eq!(h.platform.webhook_ids(G), vec![7]);
    assert_eq!(h.sentinel.panic.get_level(G), PanicLevel::Medium);
}

#[tokio::test]
async fn reconciliation_is_skipped_while_webhook_creation_is_blocked() {
    let h = Harness::new();
    h.sentinel.webhooks.warmup(G).await;
    h.sentinel.panic.enable_panic(G, PanicLevel::Medium, 5).await;
    h.platform.add_webhook(G, 1);

    assert_eq!(h.sentinel.webhooks.on_webhooks_update(G).await, WebhookVerdict::Skipped);
    assert!(h.sentinel.webhooks.known(G).is_empty());
}

#[tokio::test]
async fn missed_warmup_still_catches_a_burst() {
    let h = Harness::new();
    let guard = &h.sentinel.webhooks;
    // stary webhook sprzed okna: zostaje bazą
    h.platform.add_webhook(G, 1);

    let mut created = Vec::new();
    for seq in 1..=3 {
        let id = h.snowflake_now(seq);
        created.push(id);
        h.platform.add_webhook(G, id);
        assert_eq!(
            guard.on_webhooks_update(G).await,
            WebhookVerdict::Reconciled { new: 1, count: seq as usize }
        );
        h.clock.advance(TimeDelta::seconds(5));
    }
    let last = h.snowflake_now(4);
    created.push(last);
    h.platform.add_webhook(G, last);

    assert_eq!(
        guard.on_webhooks_update(G).await,
        WebhookVerdict::Remediated { deleted: created, failed: vec![] }
    );
    assert_eq!(h.platform.webhook_ids(G), vec![1]);
    assert_eq!(h.sentinel.panic.get_level(G), PanicLevel::Medium);
}

#[tokio::test]
async fn quiet_guild_state_is_swept_and_reseeded() {
    let h = Harness::new();
    h.platform.add_webhook(G, 1);
    h.sentinel.webhooks.warmup(G).await;
    h.sentinel.webhooks.warmup(G + 1).await;
    h.platform.add_webhook(G, 2);
    h.sentinel.webhooks.on_webhooks_update(G).await;

    h.clock.advance(TimeDelta::minutes(31));
    assert!(h.sentinel.evict_idle(TimeDelta::minutes(30)) >= 3);
    assert!(h.sentinel.webhooks.known(G).is_empty());

    // stare webhooki wracają jako baza, nic nie jest kasowane
    assert_eq!(h.sentinel.webhooks.on_webhooks_update(G).await, WebhookVerdict::Seeded { known: 2 });
    assert!(h.platform.deleted().is_empty());
}
