//! Dokument konfiguracji gildii (to, co trzyma magazyn) + budowniczy łatek.
//!
//! Brakujące pola wypełniają się wartościami domyślnymi, więc pusty dokument
//! `{}` oznacza „wszystko domyślne”. Ścieżki:
//!   security.panic                 – lustro stanu paniki
//!   security.spike / .webhooks     – progi antinuke
//!   modules.introduce.*            – progi weryfikacji, statystyki, wyniki
//!   modules.gateway_v4.slots.*     – stan blokady bramki

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::panic::PanicLevel;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildConfig {
    pub security: SecurityConfig,
    pub modules: Modules,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub panic: PanicMirror,
    /// Czas paniki nakładanej automatycznie (spike / webhooki).
    pub panic_minutes: u32,
    pub spike: SpikeThresholds,
    pub webhooks: WebhookThresholds,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            panic: PanicMirror::default(),
            panic_minutes: 15,
            spike: SpikeThresholds::default(),
            webhooks: WebhookThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanicMirror {
    pub active: bool,
    pub level: Option<PanicLevel>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpikeThresholds {
    pub window_secs: u32,
    pub channel_delete: u32,
    pub role_delete: u32,
    pub role_permission_update: u32,
    pub ban: u32,
}

impl Default for SpikeThresholds {
    fn default() -> Self {
        Self {
            window_secs: 10,
            channel_delete: 5,
            role_delete: 5,
            role_permission_update: 6,
            ban: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookThresholds {
    pub window_secs: u32,
    pub threshold: u32,
}

impl Default for WebhookThresholds {
    fn default() -> Self {
        Self {
            window_secs: 60,
            threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Modules {
    pub introduce: IntroduceModule,
    pub gateway_v4: GatewayModule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntroduceModule {
    pub verified_role_id: Option<u64>,
    /// Rola „przejściowa” nadawana przy wejściu, zdejmowana po weryfikacji.
    pub unverified_role_id: Option<u64>,
    pub new_account_role_id: Option<u64>,
    pub suspicious_role_id: Option<u64>,
    pub bypass_role_ids: Vec<u64>,
    /// Uruchom bramkę od razu przy wejściu członka (zamiast czekać na przycisk).
    pub verify_on_join: bool,

    pub rate_limit_per_minute: u32,
    pub raid_threshold_per_minute: u32,
    pub min_account_age_days: u32,
    pub min_join_minutes: u32,
    pub lock_duration_minutes: u32,
    pub auto_lock: bool,

    pub stats: VerificationStats,
    pub introduced_users: BTreeSet<u64>,
    pub member_scores: BTreeMap<u64, MemberScore>,
}

impl Default for IntroduceModule {
    fn default() -> Self {
        Self {
            verified_role_id: None,
            unverified_role_id: None,
            new_account_role_id: None,
            suspicious_role_id: None,
            bypass_role_ids: Vec::new(),
            verify_on_join: false,
            rate_limit_per_minute: 3,
            raid_threshold_per_minute: 15,
            min_account_age_days: 0,
            min_join_minutes: 0,
            lock_duration_minutes: 10,
            auto_lock: true,
            stats: VerificationStats::default(),
            introduced_users: BTreeSet::new(),
            member_scores: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationStats {
    pub total_verified: u64,
    pub total_blocked: u64,
    pub today_verified: u64,
    pub today_blocked: u64,
    /// Dzień (UTC), którego dotyczą liczniki `today_*`.
    pub day: Option<NaiveDate>,
}

impl VerificationStats {
    /// Liczniki po zdarzeniu w dniu `today` (reset `today_*` po zmianie daty).
    pub fn bumped(&self, today: NaiveDate, verified: bool) -> Self {
        let mut next = self.clone();
        if next.day != Some(today) {
            next.day = Some(today);
            next.today_verified = 0;
            next.today_blocked = 0;
        }
        if verified {
            next.total_verified += 1;
            next.today_verified += 1;
        } else {
            next.total_blocked += 1;
            next.today_blocked += 1;
        }
        next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberScore {
    pub score: u8,
    pub risk: Risk,
    pub calculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayModule {
    pub slots: GatewaySlots,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySlots {
    pub locked: bool,
    pub lock_until: Option<DateTime<Utc>>,
}

/* ==============================
   Łatki (JSON merge patch)
   ============================== */

pub mod patch {
    use super::*;

    pub fn panic_active(level: PanicLevel, since: DateTime<Utc>, until: DateTime<Utc>) -> Value {
        json!({ "security": { "panic": {
            "active": true,
            "level": level,
            "since": since,
            "until": until,
        }}})
    }

    pub fn panic_inactive() -> Value {
        json!({ "security": { "panic": {
            "active": false,
            "level": null,
            "since": null,
            "until": null,
        }}})
    }

    pub fn gateway_lock(until: DateTime<Utc>) -> Value {
        json!({ "modules": { "gateway_v4": { "slots": {
            "locked": true,
            "lock_until": until,
        }}}})
    }

    pub fn gateway_unlock() -> Value {
        json!({ "modules": { "gateway_v4": { "slots": {
            "locked": false,
            "lock_until": null,
        }}}})
    }

    pub fn stats(stats: &VerificationStats) -> Value {
        json!({ "modules": { "introduce": { "stats": stats } } })
    }

    /// Zapis udanej weryfikacji: nowy zbiór wprowadzonych, wynik (opcjonalnie) i statystyki.
    pub fn introduced(
        introduced: &BTreeSet<u64>,
        score: Option<(u64, &MemberScore)>,
        stats: &VerificationStats,
    ) -> Value {
        let mut introduce = json!({
            "introduced_users": introduced,
            "stats": stats,
        });
        if let Some((user_id, score)) = score {
            introduce["member_scores"] = json!({ (user_id.to_string()): score });
        }
        json!({ "modules": { "introduce": introduce } })
    }
}

/// JSON merge patch: obiekty łączone rekurencyjnie, `null` usuwa klucz,
/// każda inna wartość nadpisuje.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }
    if let Value::Object(target_map) = target {
        for (k, v) in patch_map {
            if v.is_null() {
                target_map.remove(k);
            } else {
                merge_patch(target_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg: GuildConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(cfg, GuildConfig::default());
        assert_eq!(cfg.modules.introduce.rate_limit_per_minute, 3);
        assert_eq!(cfg.modules.introduce.raid_threshold_per_minute, 15);
        assert_eq!(cfg.modules.introduce.lock_duration_minutes, 10);
        assert_eq!(cfg.security.spike.role_permission_update, 6);
        assert_eq!(cfg.security.webhooks.threshold, 3);
    }

    #[test]
    fn merge_patch_merges_nested_objects_and_removes_nulls() {
        let mut doc = json!({ "a": { "b": 1, "c": 2 }, "d": [1, 2] });
        merge_patch(&mut doc, &json!({ "a": { "b": 5, "c": null }, "d": [3] }));
        assert_eq!(doc, json!({ "a": { "b": 5 }, "d": [3] }));
    }

    #[test]
    fn member_scores_patch_keeps_other_users() {
        let now = Utc::now();
        let mut doc = serde_json::to_value(GuildConfig::default()).unwrap();
        let first = MemberScore { score: 60, risk: Risk::Medium, calculated_at: now };
        let second = MemberScore { score: 80, risk: Risk::Low, calculated_at: now };
        let stats = VerificationStats::default();

        merge_patch(&mut doc, &patch::introduced(&BTreeSet::from([1]), Some((1, &first)), &stats));
        merge_patch(&mut doc, &patch::introduced(&BTreeSet::from([1, 2]), Some((2, &second)), &stats));

        let cfg: GuildConfig = serde_json::from_value(doc).unwrap();
        assert_eq!(cfg.modules.introduce.member_scores.len(), 2);
        assert_eq!(cfg.modules.introduce.member_scores[&2].risk, Risk::Low);
        assert!(cfg.modules.introduce.introduced_users.contains(&2));
    }

    #[test]
    fn stats_roll_over_on_new_day() {
        let d1 = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let s = VerificationStats::default()
            .bumped(d1, true)
            .bumped(d1, false)
            .bumped(d2, true);
        assert_eq!(s.total_verified, 2);
        assert_eq!(s.total_blocked, 1);
        assert_eq!(s.today_verified, 1);
        assert_eq!(s.today_blocked, 0);
        assert_eq!(s.day, Some(d2));
    }
}
