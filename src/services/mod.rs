pub mod probe_engine;
pub mod stream_prober;

pub use probe_engine::{ProbeEngineError, ProbeRunSummary, StreamProbeEngine};
pub use stream_prober::{FfprobeProber, MediaProber};
