//! Credential rotation and resilient invocation for quota-limited providers
//!
//! Calls an upstream API through a rotating pool of credentials and, for
//! providers that need it, a rotating pool of egress routes (HTTP proxies).
//! Every attempt's result is classified, and the classification decides
//! whether the next attempt retries as-is, switches route, switches
//! credential, or gives up.
//!
//! Invocation lifecycle:
//! 1. Caller builds a `RequestDescriptor` and obtains a cancellation token
//!    (usually from `TaskRegistry::register`, one live task per owner)
//! 2. `Invoker::invoke` reads the current credential/route and sends one attempt
//! 3. `classify` maps the result to success, transient, quota/auth, egress or fatal
//! 4. Quota/auth advances the shared credential pool; egress failures advance
//!    the shared egress pool; transient failures sleep and retry (capped)
//! 5. The call ends with the payload, `Fatal`, `Exhausted`, or `Cancelled`
//!
//! Pool cursors are process-wide: a rotation made by one call is seen by all
//! concurrent calls for the same provider.

pub mod cancel;
pub mod classify;
pub mod error;
pub mod invoker;
pub mod pool;

pub use cancel::{Registration, TaskHandle, TaskRegistry};
pub use classify::{AttemptOutcome, ELEVENLABS_SIGNALS, GEMINI_SIGNALS, SignalTable, classify};
pub use error::{Error, InvocationError, Result};
pub use invoker::{Invoker, RetryPolicy, SearchState, Step};
pub use pool::{Credential, CredentialPool, EgressPool, RotatingPool};
pub use tokio_util::sync::CancellationToken;
