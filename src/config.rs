use crate::error::{Error, Result};
use crate::executor::PanicStrategy;
use std::time::Duration;

/// Smallest timer precision the dispatch loop accepts.
pub const MIN_TIMER_PRECISION: Duration = Duration::from_millis(1);

/// Default slow-task threshold (a quarter of a second).
pub const DEFAULT_SLOW_TASK_THRESHOLD: Duration = Duration::from_millis(250);

const TASK_BIT: u32 = 10;

/// Sizing of a [`TaskBuffer`](crate::buffer::TaskBuffer).
///
/// `task_max` is the high-water mark for direct admission. Once that many
/// tasks sit in the inner channel, new tasks spill to an overflow list that
/// is resumed `task_resume` tasks at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    pub channel_capacity: usize,
    pub task_max: usize,
    pub task_resume: usize,
    /// Hard ceiling for the spill list, only enforced by `try_submit`.
    pub spill_limit: Option<usize>,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1 << TASK_BIT,
            task_max: (1 << TASK_BIT) - 100,
            task_resume: 20,
            spill_limit: None,
        }
    }
}

impl BufferConfig {
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(Error::config("channel_capacity must be > 0"));
        }
        if self.task_max == 0 || self.task_max > self.channel_capacity {
            return Err(Error::config(
                "task_max must be in 1..=channel_capacity",
            ));
        }
        if self.task_resume == 0 {
            return Err(Error::config("task_resume must be > 0"));
        }
        if self.spill_limit == Some(0) {
            return Err(Error::config("spill_limit must be > 0 when set"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub timer_precision: Duration,
    pub slow_task_threshold: Duration,
    pub panic_strategy: PanicStrategy,
    pub thread_name: String,
    /// Pending-task count on the global stream past which the dispatcher
    /// warns and reports itself over backlog. The stream stays unbounded.
    pub global_backlog: usize,
    pub buffer: BufferConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timer_precision: Duration::from_secs(1),
            slow_task_threshold: DEFAULT_SLOW_TASK_THRESHOLD,
            panic_strategy: PanicStrategy::default(),
            thread_name: "dispatch-loop".to_string(),
            global_backlog: 1 << TASK_BIT,
            buffer: BufferConfig::default(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if self.timer_precision < MIN_TIMER_PRECISION {
            return Err(Error::config(format!(
                "timer precision can not be less than a millisecond (got {:?})",
                self.timer_precision
            )));
        }

        if self.slow_task_threshold.is_zero() {
            return Err(Error::config("slow_task_threshold must be > 0"));
        }

        if self.global_backlog == 0 {
            return Err(Error::config("global_backlog must be > 0"));
        }

        if self.thread_name.is_empty() {
            return Err(Error::config("thread_name must not be empty"));
        }

        self.buffer.validate()
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn timer_precision(mut self, precision: Duration) -> Self {
        self.config.timer_precision = precision;
        self
    }

    pub fn slow_task_threshold(mut self, threshold: Duration) -> Self {
        self.config.slow_task_threshold = threshold;
        self
    }

    pub fn panic_strategy(mut self, strategy: PanicStrategy) -> Self {
        self.config.panic_strategy = strategy;
        self
    }

    pub fn thread_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.thread_name = name.into();
        self
    }

    pub fn global_backlog(mut self, backlog: usize) -> Self {
        self.config.global_backlog = backlog;
        self
    }

    pub fn buffer(mut self, buffer: BufferConfig) -> Self {
        self.config.buffer = buffer;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.buffer.channel_capacity = capacity;
        self
    }

    pub fn task_max(mut self, max: usize) -> Self {
        self.config.buffer.task_max = max;
        self
    }

    pub fn task_resume(mut self, resume: usize) -> Self {
        self.config.buffer.task_resume = resume;
        self
    }

    pub fn spill_limit(mut self, limit: usize) -> Self {
        self.config.buffer.spill_limit = Some(limit);
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.buffer.channel_capacity, 1024);
        assert_eq!(config.buffer.task_max, 924);
        assert_eq!(config.buffer.task_resume, 20);
        assert_eq!(config.slow_task_threshold, Duration::from_millis(250));
    }

    #[test]
    fn test_timer_precision_below_millisecond_rejected() {
        let result = Config::builder()
            .timer_precision(Duration::from_micros(999))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));

        let config = Config::builder()
            .timer_precision(Duration::from_millis(1))
            .build()
            .unwrap();
        assert_eq!(config.timer_precision, MIN_TIMER_PRECISION);
    }

    #[test]
    fn test_buffer_thresholds_validated() {
        assert!(Config::builder().channel_capacity(4).task_max(5).build().is_err());
        assert!(Config::builder().task_resume(0).build().is_err());
        assert!(Config::builder().spill_limit(0).build().is_err());
        assert!(Config::builder().global_backlog(0).build().is_err());

        let config = Config::builder()
            .channel_capacity(6)
            .task_max(4)
            .task_resume(2)
            .build()
            .unwrap();
        assert_eq!(config.buffer.task_max, 4);
    }
}
