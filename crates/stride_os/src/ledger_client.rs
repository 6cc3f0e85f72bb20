#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use sha2::{Digest, Sha256};

use stride_kernel_contracts::ledger::{
    CalendarDate, DailyStepUpsertInput, DateRange, UserId,
};
use stride_storage::daily_ledger::{DailyLedgerStore, StorageError};

pub const LEDGER_RETRY_AFTER_MS_DEFAULT: u32 = 30_000;

/// Failure taxonomy of the remote daily ledger, as seen by the engine.
/// Transient failures are absorbed and retried on the next tick; permanent
/// failures are surfaced but never block the loop either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerClientError {
    Transient { message: String, retry_after_ms: u32 },
    Permanent { message: String },
}

impl LedgerClientError {
    pub fn transient(message: impl Into<String>, retry_after_ms: u32) -> Self {
        let msg = message.into();
        let bounded_retry_after = retry_after_ms.clamp(1_000, 300_000);
        let bounded_msg = if msg.len() > 256 {
            msg.chars().take(256).collect::<String>()
        } else {
            msg
        };
        Self::Transient {
            message: bounded_msg,
            retry_after_ms: bounded_retry_after,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        let msg = message.into();
        let bounded_msg = if msg.len() > 256 {
            msg.chars().take(256).collect::<String>()
        } else {
            msg
        };
        Self::Permanent {
            message: bounded_msg,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            LedgerClientError::Transient { message, .. } => message,
            LedgerClientError::Permanent { message } => message,
        }
    }
}

/// Stable key for one `(user, date, count)` upsert, so an at-least-once
/// retry collapses onto the original write on every client variant.
pub fn upsert_idempotency_key(user_id: &UserId, date: CalendarDate, step_count: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(date.iso_string().as_bytes());
    hasher.update(b"|");
    hasher.update(step_count.to_be_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerHttpClientConfig {
    pub endpoint: String,
    pub bearer_token: Option<String>,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl LedgerHttpClientConfig {
    pub fn from_env() -> Option<Self> {
        let endpoint = env::var("STRIDE_LEDGER_ENDPOINT").ok()?;
        let endpoint = endpoint.trim().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return None;
        }
        let bearer_token = env::var("STRIDE_LEDGER_BEARER").ok().and_then(|v| {
            let s = v.trim().to_string();
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        });
        let connect_timeout_ms = env::var("STRIDE_LEDGER_CONNECT_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| (100..=60_000).contains(v))
            .unwrap_or(3_000);
        let request_timeout_ms = env::var("STRIDE_LEDGER_REQUEST_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| (100..=120_000).contains(v))
            .unwrap_or(10_000);

        Some(Self {
            endpoint,
            bearer_token,
            connect_timeout_ms,
            request_timeout_ms,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LedgerUpsertEnvelope {
    pub schema_version: u8,
    pub user_id: String,
    pub date: String,
    pub step_count: u64,
    pub updated_at_ns: u64,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LedgerRangeQueryEnvelope {
    pub schema_version: u8,
    pub user_id: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LedgerRangeRowEnvelope {
    pub date: String,
    pub step_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LedgerRangeResultEnvelope {
    pub schema_version: u8,
    pub rows: Vec<LedgerRangeRowEnvelope>,
}

/// The engine's handle on the daily ledger. `Loopback` is the in-process
/// store used by tests and the replay CLI; `Http` talks to the remote API;
/// `AlwaysFail` injects failures.
#[derive(Debug)]
pub enum DailyLedgerClientRuntime {
    Loopback(DailyLedgerStore),
    Http(LedgerHttpClientConfig),
    AlwaysFail {
        message: String,
        retry_after_ms: u32,
    },
}

impl Default for DailyLedgerClientRuntime {
    fn default() -> Self {
        Self::from_env_or_loopback()
    }
}

impl DailyLedgerClientRuntime {
    pub fn from_env_or_loopback() -> Self {
        if let Some(config) = LedgerHttpClientConfig::from_env() {
            return Self::Http(config);
        }
        Self::Loopback(DailyLedgerStore::new_in_memory())
    }

    pub fn always_fail(message: &str, retry_after_ms: u32) -> Self {
        Self::AlwaysFail {
            message: message.to_string(),
            retry_after_ms,
        }
    }

    pub fn upsert(&mut self, input: DailyStepUpsertInput) -> Result<(), LedgerClientError> {
        match self {
            Self::Loopback(store) => match store.upsert_daily_steps(input) {
                Ok(_) => Ok(()),
                Err(err) => Err(map_storage_error(err)),
            },
            Self::AlwaysFail {
                message,
                retry_after_ms,
            } => Err(LedgerClientError::transient(
                message.clone(),
                *retry_after_ms,
            )),
            Self::Http(config) => http_upsert(config, &input),
        }
    }

    pub fn query_range(
        &mut self,
        user_id: &UserId,
        range: DateRange,
    ) -> Result<BTreeMap<CalendarDate, u64>, LedgerClientError> {
        match self {
            Self::Loopback(store) => store
                .query_daily_steps_range(user_id, range)
                .map_err(map_storage_error),
            Self::AlwaysFail {
                message,
                retry_after_ms,
            } => Err(LedgerClientError::transient(
                message.clone(),
                *retry_after_ms,
            )),
            Self::Http(config) => http_query_range(config, user_id, range),
        }
    }

    /// Today's remote value, `None` when no record exists yet.
    pub fn query_today(
        &mut self,
        user_id: &UserId,
        today: CalendarDate,
    ) -> Result<Option<u64>, LedgerClientError> {
        let range = DateRange::v1(today, today)
            .map_err(|_| LedgerClientError::permanent("single-day range must construct"))?;
        Ok(self.query_range(user_id, range)?.get(&today).copied())
    }
}

fn map_storage_error(err: StorageError) -> LedgerClientError {
    LedgerClientError::permanent(format!("ledger store rejected request: {err:?}"))
}

fn build_agent(config: &LedgerHttpClientConfig) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_millis(config.connect_timeout_ms))
        .timeout_read(Duration::from_millis(config.request_timeout_ms))
        .timeout_write(Duration::from_millis(config.request_timeout_ms))
        .build()
}

fn http_upsert(
    config: &LedgerHttpClientConfig,
    input: &DailyStepUpsertInput,
) -> Result<(), LedgerClientError> {
    let idempotency_key = input.idempotency_key.clone().unwrap_or_else(|| {
        upsert_idempotency_key(&input.user_id, input.date, input.step_count)
    });
    let envelope = LedgerUpsertEnvelope {
        schema_version: 1,
        user_id: input.user_id.as_str().to_string(),
        date: input.date.iso_string(),
        step_count: input.step_count,
        updated_at_ns: input.at.0,
        idempotency_key: idempotency_key.clone(),
    };
    let payload = serde_json::to_string(&envelope).map_err(|err| {
        LedgerClientError::transient(
            format!("upsert payload encode failed: {}", err),
            LEDGER_RETRY_AFTER_MS_DEFAULT,
        )
    })?;

    let agent = build_agent(config);
    let url = format!("{}/v1/ledger/upsert", config.endpoint);
    let mut req = agent
        .post(&url)
        .set("content-type", "application/json")
        .set("idempotency-key", &idempotency_key);
    if let Some(token) = config.bearer_token.as_ref() {
        req = req.set("authorization", &format!("Bearer {}", token));
    }
    match req.send_string(&payload) {
        Ok(resp) if (200..=299).contains(&resp.status()) => Ok(()),
        Ok(resp) => Err(status_error(resp.status(), resp.header("retry-after"))),
        Err(ureq::Error::Status(code, resp)) => {
            Err(status_error(code, resp.header("retry-after")))
        }
        Err(ureq::Error::Transport(err)) => Err(LedgerClientError::transient(
            format!("upsert transport error: {}", err),
            LEDGER_RETRY_AFTER_MS_DEFAULT,
        )),
    }
}

fn http_query_range(
    config: &LedgerHttpClientConfig,
    user_id: &UserId,
    range: DateRange,
) -> Result<BTreeMap<CalendarDate, u64>, LedgerClientError> {
    let envelope = LedgerRangeQueryEnvelope {
        schema_version: 1,
        user_id: user_id.as_str().to_string(),
        from: range.from.iso_string(),
        to: range.to.iso_string(),
    };
    let payload = serde_json::to_string(&envelope).map_err(|err| {
        LedgerClientError::transient(
            format!("range payload encode failed: {}", err),
            LEDGER_RETRY_AFTER_MS_DEFAULT,
        )
    })?;

    let agent = build_agent(config);
    let url = format!("{}/v1/ledger/range", config.endpoint);
    let mut req = agent.post(&url).set("content-type", "application/json");
    if let Some(token) = config.bearer_token.as_ref() {
        req = req.set("authorization", &format!("Bearer {}", token));
    }
    let resp = match req.send_string(&payload) {
        Ok(resp) if (200..=299).contains(&resp.status()) => resp,
        Ok(resp) => return Err(status_error(resp.status(), resp.header("retry-after"))),
        Err(ureq::Error::Status(code, resp)) => {
            return Err(status_error(code, resp.header("retry-after")))
        }
        Err(ureq::Error::Transport(err)) => {
            return Err(LedgerClientError::transient(
                format!("range transport error: {}", err),
                LEDGER_RETRY_AFTER_MS_DEFAULT,
            ))
        }
    };

    let body = resp.into_string().map_err(|err| {
        LedgerClientError::transient(
            format!("range response read failed: {}", err),
            LEDGER_RETRY_AFTER_MS_DEFAULT,
        )
    })?;
    let result: LedgerRangeResultEnvelope = serde_json::from_str(&body)
        .map_err(|err| LedgerClientError::permanent(format!("range response malformed: {}", err)))?;

    let mut rows = BTreeMap::new();
    for row in result.rows {
        let date = CalendarDate::parse_iso(&row.date)
            .map_err(|_| LedgerClientError::permanent("range response carried invalid date"))?;
        if range.contains(date) {
            rows.insert(date, row.step_count);
        }
    }
    Ok(rows)
}

fn status_error(code: u16, retry_after_header: Option<&str>) -> LedgerClientError {
    if (400..=499).contains(&code) {
        LedgerClientError::permanent(format!("ledger rejected request with http status {}", code))
    } else {
        LedgerClientError::transient(
            format!("ledger failed with http status {}", code),
            parse_retry_after_ms(retry_after_header),
        )
    }
}

fn parse_retry_after_ms(retry_after_header: Option<&str>) -> u32 {
    let Some(header) = retry_after_header else {
        return LEDGER_RETRY_AFTER_MS_DEFAULT;
    };
    let seconds = header.trim().parse::<u32>().ok();
    seconds
        .map(|s| s.saturating_mul(1_000))
        .filter(|ms| (1_000..=300_000).contains(ms))
        .unwrap_or(LEDGER_RETRY_AFTER_MS_DEFAULT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stride_kernel_contracts::MonotonicTimeNs;

    fn user() -> UserId {
        UserId::new("user_demo").unwrap()
    }

    fn date(day: u32) -> CalendarDate {
        CalendarDate::new(2026, 8, day).unwrap()
    }

    #[test]
    fn at_ledger_client_01_loopback_round_trip() {
        let mut client = DailyLedgerClientRuntime::Loopback(DailyLedgerStore::new_in_memory());
        let input = DailyStepUpsertInput::v1(
            MonotonicTimeNs(10),
            user(),
            date(6),
            1_200,
            Some(upsert_idempotency_key(&user(), date(6), 1_200)),
        )
        .unwrap();
        client.upsert(input).unwrap();

        assert_eq!(client.query_today(&user(), date(6)).unwrap(), Some(1_200));
        assert_eq!(client.query_today(&user(), date(7)).unwrap(), None);
    }

    #[test]
    fn at_ledger_client_02_always_fail_reports_transient() {
        let mut client = DailyLedgerClientRuntime::always_fail("ledger unreachable", 5_000);
        let err = client.query_today(&user(), date(6)).unwrap_err();
        assert!(matches!(
            err,
            LedgerClientError::Transient {
                retry_after_ms: 5_000,
                ..
            }
        ));
    }

    #[test]
    fn at_ledger_client_03_idempotency_key_is_stable_per_payload() {
        let a = upsert_idempotency_key(&user(), date(6), 1_200);
        let b = upsert_idempotency_key(&user(), date(6), 1_200);
        let c = upsert_idempotency_key(&user(), date(6), 1_201);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn at_ledger_client_04_range_envelope_round_trips_as_json() {
        let result = LedgerRangeResultEnvelope {
            schema_version: 1,
            rows: vec![
                LedgerRangeRowEnvelope {
                    date: "2026-08-05".to_string(),
                    step_count: 900,
                },
                LedgerRangeRowEnvelope {
                    date: "2026-08-06".to_string(),
                    step_count: 1_200,
                },
            ],
        };
        let encoded = serde_json::to_string(&result).unwrap();
        let decoded: LedgerRangeResultEnvelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, result);
    }
}
