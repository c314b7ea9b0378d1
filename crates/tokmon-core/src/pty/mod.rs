//! Pseudo-terminal plumbing: executable discovery and the session controller.

pub mod resolver;
pub mod session;

pub use resolver::{
    ChainResolver, ExecutableProbe, ExecutableResolver, ResolutionSource, ResolvedExecutable,
    SystemProbe,
};
pub use session::{
    open_session, NoResize, PtyResize, PtySession, SpawnSpec, Terminal, WindowSize, WindowSizer,
};
