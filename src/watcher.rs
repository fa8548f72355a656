use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{AppConfig, WatcherEntry};
use crate::error::{ConfigError, FetchError};
use crate::model::{NotificationPayload, Operator};
use crate::notification::build_payload;
use crate::sampler::Sampler;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Immutable settings of one watcher.
#[derive(Debug, Clone, PartialEq)]
pub struct WatcherConfig {
    pub instrument: String,
    pub operator: Operator,
    pub threshold: Decimal,
    pub poll_interval_secs: u64,
}

impl WatcherConfig {
    /// Validate raw construction parameters.
    ///
    /// `threshold` is taken as text so it never passes through a binary float.
    pub fn new(
        instrument: &str,
        operator: &str,
        threshold: &str,
        poll_interval_secs: Option<u64>,
    ) -> Result<Self, Report<ConfigError>> {
        let instrument = instrument.trim();
        if instrument.is_empty() {
            return Err(Report::new(ConfigError::Validation {
                field: "instrument must not be empty".into(),
            }));
        }

        let operator = Operator::from_str(operator).ok_or_else(|| {
            Report::new(ConfigError::InvalidOperator {
                value: operator.to_owned(),
            })
        })?;

        let threshold = Decimal::from_str(threshold.trim())
            .change_context(ConfigError::InvalidThreshold {
                value: threshold.to_owned(),
            })
            .attach_with(|| format!("instrument: {instrument}"))?;

        let poll_interval_secs = poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        if poll_interval_secs == 0 {
            return Err(Report::new(ConfigError::Validation {
                field: format!("watcher[{instrument}].interval must be positive"),
            }));
        }

        Ok(Self {
            instrument: instrument.to_owned(),
            operator,
            threshold,
            poll_interval_secs,
        })
    }

    /// Build every `WatcherConfig` from a loaded `AppConfig`.
    pub fn from_config(config: &AppConfig) -> Result<Vec<Self>, Report<ConfigError>> {
        config.watchers.iter().map(Self::from_entry).collect()
    }

    pub fn from_entry(entry: &WatcherEntry) -> Result<Self, Report<ConfigError>> {
        Self::new(
            &entry.instrument,
            &entry.operator,
            &entry.threshold,
            entry.interval,
        )
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Edge detector over predicate outcomes.
///
/// `already_notified` is true only while the latest sample satisfies the
/// predicate and its episode has been reported.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WatcherState {
    already_notified: bool,
}

impl WatcherState {
    pub fn already_notified(&self) -> bool {
        self.already_notified
    }

    /// Whether a sample with this predicate outcome would open a new
    /// crossing episode. Does not change the state.
    pub fn opens_episode(&self, crossed: bool) -> bool {
        crossed && !self.already_notified
    }

    /// Feed one sample's predicate outcome. Returns `true` when the sample
    /// opens a new crossing episode.
    pub fn observe(&mut self, crossed: bool) -> bool {
        if !crossed {
            self.already_notified = false;
            return false;
        }
        if self.already_notified {
            return false;
        }
        self.already_notified = true;
        true
    }
}

/// Turns periodic ticker samples into one notification per crossing episode.
pub struct ThresholdWatcher {
    config: WatcherConfig,
    sampler: Arc<dyn Sampler>,
    state: Mutex<WatcherState>,
}

impl ThresholdWatcher {
    pub fn new(config: WatcherConfig, sampler: Arc<dyn Sampler>) -> Self {
        Self {
            config,
            sampler,
            state: Mutex::new(WatcherState::default()),
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    pub async fn already_notified(&self) -> bool {
        self.state.lock().await.already_notified()
    }

    /// Sample once and run edge detection.
    ///
    /// The state lock is held across the fetch so overlapping calls on the
    /// same watcher serialize. A failed fetch or an unformattable snapshot
    /// returns before the state is touched.
    pub async fn tick(&self) -> Result<Option<NotificationPayload>, Report<FetchError>> {
        let mut state = self.state.lock().await;

        let snapshot = self
            .sampler
            .fetch(&self.config.instrument)
            .await
            .attach_with(|| format!("instrument: {}", self.config.instrument))?;

        let crossed = self
            .config
            .operator
            .holds(snapshot.last, self.config.threshold);
        let was_notified = state.already_notified();

        debug!(
            sampler = self.sampler.name(),
            instrument = %snapshot.instrument,
            last = %snapshot.last,
            fetched_at = %snapshot.fetched_at,
            operator = %self.config.operator,
            threshold = %self.config.threshold,
            crossed,
            "ticker sampled"
        );

        if !state.opens_episode(crossed) {
            if was_notified && !crossed {
                debug!(instrument = %self.config.instrument, "watcher re-armed");
            }
            state.observe(crossed);
            return Ok(None);
        }

        // Build first so a formatting failure leaves the episode unreported.
        let payload = build_payload(&self.config.instrument, &snapshot)
            .attach_with(|| format!("instrument: {}", self.config.instrument))?;
        state.observe(crossed);

        info!(
            instrument = %self.config.instrument,
            last = %snapshot.last,
            operator = %self.config.operator,
            threshold = %self.config.threshold,
            "threshold crossed"
        );
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::sampler::poloniex::PoloniexSampler;
    use crate::sampler::testing::{
        ScriptedSampler, TICKER_FIXTURE, network_failure, snapshot, ticker_body_with_last,
    };

    fn make_watcher(
        operator: &str,
        threshold: &str,
        sampler: Arc<ScriptedSampler>,
    ) -> ThresholdWatcher {
        let config = WatcherConfig::new("STR", operator, threshold, None).unwrap();
        ThresholdWatcher::new(config, sampler)
    }

    async fn run(watcher: &ThresholdWatcher, ticks: usize) -> Vec<Option<String>> {
        let mut titles = Vec::new();
        for _ in 0..ticks {
            let payload = watcher.tick().await.unwrap();
            titles.push(payload.map(|p| p.title));
        }
        titles
    }

    #[test]
    fn config_defaults_interval_to_fifteen_seconds() {
        let config = WatcherConfig::new("STR", "less_than", "0.00000405", None).unwrap();
        assert_eq!(config.poll_interval_secs, 15);
        assert_eq!(config.poll_interval(), Duration::from_secs(15));
        assert_eq!(config.threshold.to_string(), "0.00000405");
        assert_eq!(config.operator, Operator::LessThan);
    }

    #[test]
    fn config_rejects_unknown_operator() {
        let err = WatcherConfig::new("STR", "equals", "1", None).unwrap_err();
        match err.current_context() {
            ConfigError::InvalidOperator { value } => assert_eq!(value, "equals"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn config_rejects_non_decimal_threshold() {
        let err = WatcherConfig::new("STR", "less_than", "cheap", None).unwrap_err();
        assert!(matches!(
            err.current_context(),
            ConfigError::InvalidThreshold { .. }
        ));
    }

    #[test]
    fn config_rejects_zero_interval_and_blank_instrument() {
        assert!(WatcherConfig::new("STR", "less_than", "1", Some(0)).is_err());
        assert!(WatcherConfig::new("  ", "less_than", "1", None).is_err());
    }

    #[tokio::test]
    async fn less_than_scenario_notifies_once_per_episode() {
        let sampler = Arc::new(ScriptedSampler::from_values(&[
            "0.00000434",
            "0.00000434",
            "0.00000436",
            "0.00000430",
        ]));
        let watcher = make_watcher("less_than", "0.00000435", sampler);

        let titles = run(&watcher, 4).await;
        assert_eq!(
            titles,
            vec![
                Some("Poloniex: STR traded as 0.00000434".to_owned()),
                None,
                None,
                Some("Poloniex: STR traded as 0.00000430".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn greater_than_scenario_notifies_once_per_episode() {
        let sampler = Arc::new(ScriptedSampler::from_values(&[
            "0.00000434",
            "0.00000434",
            "0.00000432",
            "0.00000437",
        ]));
        let watcher = make_watcher("greater_than", "0.00000433", sampler);

        let titles = run(&watcher, 4).await;
        assert_eq!(
            titles,
            vec![
                Some("Poloniex: STR traded as 0.00000434".to_owned()),
                None,
                None,
                Some("Poloniex: STR traded as 0.00000437".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn value_equal_to_threshold_never_notifies() {
        for operator in ["greater_than", "less_than"] {
            let sampler = Arc::new(ScriptedSampler::from_values(&[
                "0.00000435",
                "0.000004350",
            ]));
            let watcher = make_watcher(operator, "0.00000435", sampler);
            assert_eq!(run(&watcher, 2).await, vec![None, None]);
            assert!(!watcher.already_notified().await);
        }
    }

    #[tokio::test]
    async fn sustained_crossing_notifies_only_first_sample() {
        let values = ["0.00000401"; 10];
        let sampler = Arc::new(ScriptedSampler::from_values(&values));
        let watcher = make_watcher("less_than", "0.00000405", sampler);

        let titles = run(&watcher, 10).await;
        assert_eq!(titles.iter().filter(|t| t.is_some()).count(), 1);
        assert!(titles[0].is_some());
        assert!(watcher.already_notified().await);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_state_untouched() {
        let sampler = Arc::new(ScriptedSampler::new(vec![
            Ok(snapshot("0.00000434")),
            Err(network_failure()),
            Ok(snapshot("0.00000434")),
        ]));
        let watcher = make_watcher("less_than", "0.00000435", sampler);

        assert!(watcher.tick().await.unwrap().is_some());
        assert!(watcher.tick().await.is_err());
        assert!(watcher.already_notified().await);
        assert!(watcher.tick().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_fetch_while_armed_does_not_notify() {
        let sampler = Arc::new(ScriptedSampler::new(vec![
            Ok(snapshot("0.00000440")),
            Err(network_failure()),
            Ok(snapshot("0.00000430")),
        ]));
        let watcher = make_watcher("less_than", "0.00000435", sampler);

        assert!(watcher.tick().await.unwrap().is_none());
        assert!(watcher.tick().await.is_err());
        assert!(!watcher.already_notified().await);
        assert!(watcher.tick().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unformattable_crossing_keeps_episode_unreported() {
        let mut huge = snapshot("0.00000434");
        huge.percent_change_24h = Decimal::MAX;
        let sampler = Arc::new(ScriptedSampler::new(vec![
            Ok(huge),
            Ok(snapshot("0.00000434")),
        ]));
        let watcher = make_watcher("less_than", "0.00000435", sampler);

        let err = watcher.tick().await.unwrap_err();
        assert!(matches!(
            err.current_context(),
            FetchError::MalformedData { .. }
        ));
        assert!(!watcher.already_notified().await);

        let payload = watcher.tick().await.unwrap();
        assert_eq!(
            payload.map(|p| p.title),
            Some("Poloniex: STR traded as 0.00000434".to_owned())
        );
        assert!(watcher.already_notified().await);
    }

    #[tokio::test]
    async fn fetch_error_is_propagated_with_context() {
        let sampler = Arc::new(ScriptedSampler::new(vec![Err(network_failure())]));
        let watcher = make_watcher("less_than", "0.00000435", sampler);

        let err = watcher.tick().await.unwrap_err();
        assert!(matches!(err.current_context(), FetchError::Network { .. }));
        assert!(format!("{err:?}").contains("instrument: STR"));
    }

    #[tokio::test]
    async fn concurrent_ticks_notify_once() {
        let sampler = Arc::new(ScriptedSampler::from_values(&["0.00000434"; 8]));
        let watcher = Arc::new(make_watcher("less_than", "0.00000435", Arc::clone(&sampler)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let watcher = Arc::clone(&watcher);
                tokio::spawn(async move { watcher.tick().await.unwrap() })
            })
            .collect();

        let mut fired = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
        assert_eq!(sampler.calls(), 8);
    }

    #[tokio::test]
    async fn live_response_produces_full_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/public"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(TICKER_FIXTURE, "application/json"))
            .mount(&server)
            .await;

        let sampler = PoloniexSampler::new(
            server.uri(),
            Duration::from_secs(5),
            nonzero_ext::nonzero!(100u32),
        )
        .unwrap();
        let config = WatcherConfig::new("STR", "less_than", "0.00000435", None).unwrap();
        let watcher = ThresholdWatcher::new(config, Arc::new(sampler));

        let payload = watcher.tick().await.unwrap().expect("first crossing notifies");
        assert_eq!(payload.channel_key, "poloniex");
        assert_eq!(payload.title, "Poloniex: STR traded as 0.00000434");
        assert_eq!(
            payload.body,
            [
                "Volume: 1917.52148220",
                "24h Change: 18.9%",
                "24h High: 0.00000467",
                "24h Low: 0.00000361",
                "",
                "https://poloniex.com/exchange#BTC_STR",
            ]
            .join("\n")
        );

        assert!(watcher.tick().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn live_response_sequence_rearms_after_price_change() {
        let server = MockServer::start().await;
        for last in ["0.00000434", "0.00000436"] {
            Mock::given(method("GET"))
                .and(path("/public"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_raw(ticker_body_with_last("STR", last), "application/json"),
                )
                .up_to_n_times(1)
                .mount(&server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path("/public"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(ticker_body_with_last("STR", "0.00000430"), "application/json"),
            )
            .mount(&server)
            .await;

        let sampler = PoloniexSampler::new(
            server.uri(),
            Duration::from_secs(5),
            nonzero_ext::nonzero!(100u32),
        )
        .unwrap();
        let config = WatcherConfig::new("STR", "less_than", "0.00000435", None).unwrap();
        let watcher = ThresholdWatcher::new(config, Arc::new(sampler));

        let mut titles = Vec::new();
        for _ in 0..3 {
            if let Some(payload) = watcher.tick().await.unwrap() {
                titles.push(payload.title);
            }
        }
        assert_eq!(
            titles,
            vec![
                "Poloniex: STR traded as 0.00000434",
                "Poloniex: STR traded as 0.00000430",
            ]
        );
    }

    #[test]
    fn state_rearms_after_non_crossing_sample() {
        let mut state = WatcherState::default();
        assert!(state.observe(true));
        assert!(!state.observe(true));
        assert!(!state.observe(false));
        assert!(!state.already_notified());
        assert!(state.observe(true));
    }

    #[test]
    fn opens_episode_does_not_mutate() {
        let mut state = WatcherState::default();
        assert!(state.opens_episode(true));
        assert!(!state.opens_episode(false));
        assert!(!state.already_notified());

        state.observe(true);
        assert!(!state.opens_episode(true));
        assert!(state.already_notified());
    }

    fn crossing_runs(flags: &[bool]) -> usize {
        flags
            .iter()
            .enumerate()
            .filter(|&(i, &crossed)| crossed && (i == 0 || !flags[i - 1]))
            .count()
    }

    proptest! {
        #[test]
        fn notifications_equal_crossing_episodes(
            values in prop::collection::vec(0i64..20, 0..64),
            threshold in 0i64..20,
            greater in any::<bool>(),
        ) {
            let operator = if greater { Operator::GreaterThan } else { Operator::LessThan };
            let threshold = Decimal::new(threshold, 8);
            let flags: Vec<bool> = values
                .iter()
                .map(|&v| operator.holds(Decimal::new(v, 8), threshold))
                .collect();

            let mut state = WatcherState::default();
            let fired = flags.iter().filter(|&&crossed| state.observe(crossed)).count();

            prop_assert_eq!(fired, crossing_runs(&flags));
            prop_assert_eq!(state.already_notified(), flags.last().copied().unwrap_or(false));
        }
    }
}
