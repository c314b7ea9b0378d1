//! Timing and command options for the interaction driver.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Longest accepted duration for any timing option (one day)
pub const MAX_DURATION_SECS: f64 = 86_400.0;

/// Driver options, deserialized from the `[driver]` table of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Upper bound on waiting for the ready marker before typing anyway
    #[serde(default = "default_initial_wait")]
    pub initial_wait_sec: f64,

    /// Pause between readiness and the first keystroke
    #[serde(default = "default_ready_settle")]
    pub ready_settle_sec: f64,

    /// Wait for the help-hint acknowledgment before the second submit
    #[serde(default = "default_command_ack_wait")]
    pub command_ack_wait_sec: f64,

    /// Delay between the typed command and its submit keystroke
    #[serde(default = "default_submit_delay")]
    pub submit_delay_sec: f64,

    /// Type commands one key at a time instead of a single write
    #[serde(default)]
    pub type_keys_individually: bool,

    /// Delay between keys when typing individually
    #[serde(default = "default_key_interval")]
    pub key_interval_sec: f64,

    /// Start pressing Tab after this long without the settings marker
    #[serde(default = "default_tab_grace")]
    pub tab_grace_sec: f64,

    /// Minimum interval between Tab presses
    #[serde(default = "default_tab_interval")]
    pub tab_interval_sec: f64,

    /// Issue the fallback command after this long without usage data
    #[serde(default = "default_fallback_grace")]
    pub fallback_grace_sec: f64,

    /// Settle time between the usage data appearing and the exit command
    #[serde(default = "default_detail_settle")]
    pub detail_settle_sec: f64,

    /// Maximum acknowledgments of the folder-confirmation prompt
    #[serde(default = "default_folder_confirm_retry_limit")]
    pub folder_confirm_retry_limit: u32,

    /// Interval between folder-confirmation acknowledgments
    #[serde(default = "default_folder_confirm_retry_interval")]
    pub folder_confirm_retry_interval_sec: f64,

    /// Abort if the folder prompt is still shown this long after first sighting
    #[serde(default = "default_folder_confirm_window")]
    pub folder_confirm_window_sec: f64,

    /// Wall-clock limit after which the exit command is sent regardless
    #[serde(default = "default_hard_ceiling")]
    pub hard_ceiling_sec: f64,

    /// Grace period after the exit command before the child is terminated
    #[serde(default = "default_exit_settle")]
    pub exit_settle_sec: f64,

    /// Maximum wait for terminal output per loop tick (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Command that opens the status screen
    #[serde(default = "default_command")]
    pub command: String,

    /// Secondary informational command, typed once if usage data never shows
    #[serde(default = "default_fallback_command")]
    pub fallback_command: String,

    /// Command that quits the target program
    #[serde(default = "default_exit_command")]
    pub exit_command: String,
}

fn default_initial_wait() -> f64 {
    8.0
}

fn default_ready_settle() -> f64 {
    0.5
}

fn default_command_ack_wait() -> f64 {
    4.0
}

fn default_submit_delay() -> f64 {
    0.4
}

fn default_key_interval() -> f64 {
    0.08
}

fn default_tab_grace() -> f64 {
    8.0
}

fn default_tab_interval() -> f64 {
    1.5
}

fn default_fallback_grace() -> f64 {
    8.0
}

fn default_detail_settle() -> f64 {
    2.0
}

fn default_folder_confirm_retry_limit() -> u32 {
    3
}

fn default_folder_confirm_retry_interval() -> f64 {
    2.0
}

fn default_folder_confirm_window() -> f64 {
    10.0
}

fn default_hard_ceiling() -> f64 {
    60.0
}

fn default_exit_settle() -> f64 {
    3.0
}

fn default_poll_interval() -> u64 {
    200
}

fn default_command() -> String {
    "/status".to_string()
}

fn default_fallback_command() -> String {
    "/stats".to_string()
}

fn default_exit_command() -> String {
    "/exit".to_string()
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            initial_wait_sec: default_initial_wait(),
            ready_settle_sec: default_ready_settle(),
            command_ack_wait_sec: default_command_ack_wait(),
            submit_delay_sec: default_submit_delay(),
            type_keys_individually: false,
            key_interval_sec: default_key_interval(),
            tab_grace_sec: default_tab_grace(),
            tab_interval_sec: default_tab_interval(),
            fallback_grace_sec: default_fallback_grace(),
            detail_settle_sec: default_detail_settle(),
            folder_confirm_retry_limit: default_folder_confirm_retry_limit(),
            folder_confirm_retry_interval_sec: default_folder_confirm_retry_interval(),
            folder_confirm_window_sec: default_folder_confirm_window(),
            hard_ceiling_sec: default_hard_ceiling(),
            exit_settle_sec: default_exit_settle(),
            poll_interval_ms: default_poll_interval(),
            command: default_command(),
            fallback_command: default_fallback_command(),
            exit_command: default_exit_command(),
        }
    }
}

impl DriverConfig {
    /// Clamp values that would stall, spin or overflow the loop.
    ///
    /// Negative and NaN durations become zero; infinite or larger than
    /// [`MAX_DURATION_SECS`] become that maximum. A zero poll interval
    /// becomes 1ms.
    pub fn validate(&mut self) {
        const MIN_POLL_INTERVAL: u64 = 1;

        for (name, value) in [
            ("initial_wait_sec", &mut self.initial_wait_sec),
            ("ready_settle_sec", &mut self.ready_settle_sec),
            ("command_ack_wait_sec", &mut self.command_ack_wait_sec),
            ("submit_delay_sec", &mut self.submit_delay_sec),
            ("key_interval_sec", &mut self.key_interval_sec),
            ("tab_grace_sec", &mut self.tab_grace_sec),
            ("tab_interval_sec", &mut self.tab_interval_sec),
            ("fallback_grace_sec", &mut self.fallback_grace_sec),
            ("detail_settle_sec", &mut self.detail_settle_sec),
            (
                "folder_confirm_retry_interval_sec",
                &mut self.folder_confirm_retry_interval_sec,
            ),
            ("folder_confirm_window_sec", &mut self.folder_confirm_window_sec),
            ("hard_ceiling_sec", &mut self.hard_ceiling_sec),
            ("exit_settle_sec", &mut self.exit_settle_sec),
        ] {
            if value.is_nan() || *value < 0.0 {
                warn!("{} = {} is invalid, using 0", name, value);
                *value = 0.0;
            } else if *value > MAX_DURATION_SECS {
                warn!("{} = {} is too large, using {}", name, value, MAX_DURATION_SECS);
                *value = MAX_DURATION_SECS;
            }
        }
        if self.poll_interval_ms < MIN_POLL_INTERVAL {
            self.poll_interval_ms = MIN_POLL_INTERVAL;
        }
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Convert seconds to a duration: NaN and negatives are zero, anything
/// above [`MAX_DURATION_SECS`] (infinity included) is capped
pub(crate) fn secs(value: f64) -> Duration {
    if value.is_nan() {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value.clamp(0.0, MAX_DURATION_SECS)).unwrap_or(Duration::ZERO)
}
