//! Behaviour knobs for sample collection.

/// Configuration for an [`Application`](crate::Application).
///
/// Must be installed with
/// [`set_configuration`](crate::Application::set_configuration) before the
/// first `begin` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Target wall-clock length of one sampling window, in milliseconds.
    ///
    /// The sampling stride adapts so that one consolidated sample spans
    /// roughly this long regardless of per-task latency. `0.0` disables
    /// adaptation and every iteration is recorded.
    pub sampling_length_ms: f64,

    /// If true, threads that did not publish a sample for a request are
    /// assumed to run at the mean throughput of the threads that did, and
    /// the reply's throughput is extrapolated accordingly. Keeps the
    /// reported throughput stable against collection artifacts.
    pub adjust_throughput: bool,

    /// Maximum tolerated gap, in percent, between the measured window time
    /// and the window time estimated from latency plus idle time. Beyond
    /// it the sample's latency and load are marked inconsistent. Sampling
    /// skew is the only source of such gaps, so this can only trigger when
    /// a stride greater than one is in effect.
    pub consistency_threshold: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sampling_length_ms: 10.0,
            adjust_throughput: true,
            consistency_threshold: 5.0,
        }
    }
}
