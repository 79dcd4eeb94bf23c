use std::sync::Arc;

use skycast_alerts::{AlertScheduler, AlertSink, JobId, JobInfo, LogSink};
use skycast_forecast::{ArtifactStore, FileArtifactStore, Forecaster, TrainingReport, WINDOW};
use skycast_store::{ObservationStore, StoredObservation};
use skycast_weather::{OpenMeteoProvider, WeatherSource};

use crate::config::Config;
use crate::error::{AppError, ConfigError};

/// Main application state and lifecycle manager.
///
/// Owns the one store handle and passes it to the forecaster and the alert
/// scheduler. Blocking store and training work is moved off the async
/// runtime with `spawn_blocking`.
pub struct App {
    config: Arc<Config>,
    store: ObservationStore,
    forecaster: Forecaster,
    source: Arc<dyn WeatherSource>,
    scheduler: AlertScheduler,
}

impl App {
    /// Build the application from a validated configuration, opening the
    /// database and model directory it names.
    pub fn new(config: Config) -> Result<Self, AppError> {
        let validation = config.validate();
        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        if let Some(parent) = config.storage.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = ObservationStore::open(&config.storage.database_path)?;
        let artifacts = FileArtifactStore::new(&config.storage.models_dir)?;
        let source = OpenMeteoProvider::new(config.provider.to_open_meteo())?;

        tracing::info!(
            "Using database {} and models in {}",
            config.storage.database_path.display(),
            config.storage.models_dir.display()
        );

        Ok(Self::with_parts(
            config,
            store,
            Arc::new(artifacts),
            Arc::new(source),
            Arc::new(LogSink),
        ))
    }

    /// Assemble the application from already-built collaborators.
    pub fn with_parts(
        config: Config,
        store: ObservationStore,
        artifacts: Arc<dyn ArtifactStore>,
        source: Arc<dyn WeatherSource>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        let forecaster = Forecaster::new(store.clone(), artifacts, config.forecast.to_forecaster());
        let scheduler = AlertScheduler::new(store.clone(), source.clone(), sink)
            .with_fetch_timeout(config.provider.fetch_timeout());

        Self {
            config: Arc::new(config),
            store,
            forecaster,
            source,
            scheduler,
        }
    }

    /// Start the alert scheduler and register the configured jobs.
    ///
    /// Must be called from within a tokio runtime. Returns the number of
    /// jobs registered.
    pub fn start(&self) -> Result<usize, AppError> {
        self.scheduler.start()?;

        let default_interval = self.config.alerts.default_interval_minutes;
        for job in &self.config.alerts.jobs {
            self.scheduler
                .schedule(&job.location, &job.condition, job.interval(default_interval))?;
        }

        let registered = self.scheduler.jobs().len();
        tracing::info!("Application started with {} alert jobs", registered);
        Ok(registered)
    }

    /// Cancel all alert timers.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down application");
        self.scheduler.shutdown();
    }

    /// Fetch the current observation for `location` and append it.
    pub async fn fetch_and_save(&self, location: &str) -> Result<StoredObservation, AppError> {
        let fetched = self.source.fetch(location).await?;

        let store = self.store.clone();
        let location = location.to_string();
        let stored = tokio::task::spawn_blocking(move || {
            store.save_with_country(&location, &fetched.observation, fetched.country.as_deref())
        })
        .await??;

        Ok(stored)
    }

    /// Observations from the last `window_days` days, newest first.
    pub async fn history(
        &self,
        location: &str,
        window_days: u32,
    ) -> Result<Vec<StoredObservation>, AppError> {
        let store = self.store.clone();
        let location = location.to_string();
        let history = tokio::task::spawn_blocking(move || store.history(&location, window_days)).await??;
        Ok(history)
    }

    /// Train (or retrain) the model for `location`.
    pub async fn train(&self, location: &str) -> Result<TrainingReport, AppError> {
        let forecaster = self.forecaster.clone();
        let location = location.to_string();
        let report = tokio::task::spawn_blocking(move || forecaster.train(&location)).await??;
        Ok(report)
    }

    /// Predict the next temperature from three readings, oldest first.
    pub async fn predict(
        &self,
        location: &str,
        recent_temps: [f64; WINDOW],
    ) -> Result<Option<f64>, AppError> {
        let forecaster = self.forecaster.clone();
        let location = location.to_string();
        let prediction =
            tokio::task::spawn_blocking(move || forecaster.predict(&location, &recent_temps)).await??;
        Ok(prediction)
    }

    /// Predict the next temperature from the newest stored readings.
    pub async fn predict_next(&self, location: &str) -> Result<Option<f64>, AppError> {
        let forecaster = self.forecaster.clone();
        let location = location.to_string();
        let prediction = tokio::task::spawn_blocking(move || forecaster.predict_next(&location)).await??;
        Ok(prediction)
    }

    pub fn schedule_alert(
        &self,
        location: &str,
        condition: &str,
        interval_minutes: u32,
    ) -> Result<JobId, AppError> {
        Ok(self.scheduler.schedule(location, condition, interval_minutes)?)
    }

    pub fn cancel_alert(&self, location: &str, condition: &str) -> Result<bool, AppError> {
        Ok(self.scheduler.cancel(location, condition)?)
    }

    pub fn alerts(&self) -> Vec<JobInfo> {
        self.scheduler.jobs()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ObservationStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use crate::config::AlertJobConfig;
    use async_trait::async_trait;
    use skycast_alerts::ChannelSink;
    use skycast_forecast::{ForecastError, MemoryArtifactStore};
    use skycast_weather::{FetchError, FetchedObservation, Observation};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Reports the next temperature from a fixed cycle on every fetch.
    struct CyclingSource {
        temps: Vec<f64>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WeatherSource for CyclingSource {
        async fn fetch(&self, location: &str) -> Result<FetchedObservation, FetchError> {
            if location.trim().eq_ignore_ascii_case("atlantis") {
                return Err(FetchError::LocationNotFound(location.to_string()));
            }
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchedObservation {
                observation: Observation::new(self.temps[i % self.temps.len()], 60.0, 10.0, "Cloudy"),
                country: Some("United Kingdom".to_string()),
            })
        }
    }

    fn app(config: Config) -> (App, tokio::sync::mpsc::UnboundedReceiver<skycast_alerts::AlertEvent>) {
        let source = CyclingSource {
            temps: vec![10.0, 12.0, 14.0, 13.0, 11.0, 15.0, 16.0, 12.5],
            calls: AtomicUsize::new(0),
        };
        let (sink, events) = ChannelSink::new();
        let app = App::with_parts(
            config,
            ObservationStore::in_memory().unwrap(),
            Arc::new(MemoryArtifactStore::new()),
            Arc::new(source),
            Arc::new(sink),
        );
        (app, events)
    }

    #[tokio::test]
    async fn test_fetch_and_save_records_country() {
        let (app, _events) = app(Config::default());

        let stored = app.fetch_and_save("London").await.unwrap();
        assert_eq!(stored.location, "london");
        assert_eq!(stored.observation.temp_c, 10.0);

        let history = app.history("LONDON", 1).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(
            app.store().location("london").unwrap().unwrap().country.as_deref(),
            Some("United Kingdom")
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_surfaces_as_fetch_error() {
        let (app, _events) = app(Config::default());
        let err = app.fetch_and_save("Atlantis").await.unwrap_err();
        assert!(matches!(err, AppError::Fetch(FetchError::LocationNotFound(_))));
        assert_eq!(app.store().count("atlantis").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_train_then_predict() {
        let mut config = Config::default();
        config.forecast.epochs = 20;
        let (app, _events) = app(config);

        for _ in 0..9 {
            app.fetch_and_save("London").await.unwrap();
        }
        let err = app.train("London").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Forecast(ForecastError::InsufficientData { required: 10, actual: 9 })
        ));

        assert_eq!(app.predict("London", [10.0, 12.0, 14.0]).await.unwrap(), None);

        for _ in 0..3 {
            app.fetch_and_save("London").await.unwrap();
        }
        let report = app.train("London").await.unwrap();
        assert_eq!(report.samples, 12);
        assert_eq!(report.epochs, 20);

        let next = app.predict("London", [10.0, 12.0, 14.0]).await.unwrap();
        assert!(next.unwrap().is_finite());
        assert!(app.predict_next("london").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_alert_fetches_use_provider_timeout() {
        let mut config = Config::default();
        config.provider.timeout_secs = 7;
        let (app, _events) = app(config);
        assert_eq!(app.scheduler.fetch_timeout(), Duration::from_secs(14));
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let mut config = Config::default();
        config.provider.timeout_secs = 0;
        assert!(matches!(App::new(config), Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_new_creates_storage() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.database_path = dir.path().join("data").join("weather.db");
        config.storage.models_dir = dir.path().join("models");

        let app = App::new(config).unwrap();
        assert!(dir.path().join("data").join("weather.db").exists());
        assert!(dir.path().join("models").is_dir());
        assert!(app.alerts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_registers_configured_jobs() {
        let mut config = Config::default();
        config.alerts.default_interval_minutes = 30;
        config.alerts.jobs = vec![
            AlertJobConfig {
                location: "London".to_string(),
                condition: "temp > 13".to_string(),
                interval_minutes: Some(1),
            },
            AlertJobConfig {
                location: "Paris".to_string(),
                condition: "humidity < 40".to_string(),
                interval_minutes: None,
            },
        ];
        let (app, mut events) = app(config);

        assert!(matches!(
            app.schedule_alert("Oslo", "wind > 50", 5),
            Err(AppError::Alert(_))
        ));

        assert_eq!(app.start().unwrap(), 2);
        let jobs = app.alerts();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id.to_string(), "london_temp > 13");
        assert_eq!(jobs[0].interval_minutes, 1);
        assert_eq!(jobs[1].interval_minutes, 30);

        // London cycles 10, 12, 14: the third firing triggers
        let event = tokio::time::timeout(Duration::from_secs(10 * 60), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.location, "london");
        assert_eq!(event.value, 14.0);

        assert!(app.cancel_alert("london", "temp > 13").unwrap());
        app.shutdown();
        assert!(app.alerts().is_empty());
    }
}
