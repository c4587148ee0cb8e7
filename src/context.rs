//! RequestContext (C9): ambient per-request state carried via task-local
//! storage — recursion-depth validation and subrequest budget counters, plus
//! the actor's input/output gates so bindings never thread them explicitly.

use crate::gates::{InputGate, OutputGate};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

const MAX_REQUEST_DEPTH: u32 = 16;
const MAX_PIPELINE_DEPTH: u32 = 32;
const DEFAULT_EXTERNAL_LIMIT: u32 = 50;
const DEFAULT_INTERNAL_LIMIT: u32 = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("subrequest depth limit exceeded")]
    DepthLimitExceeded,

    #[error("too many subrequests")]
    TooManySubrequests,

    #[error(
        "Some functionality, such as asynchronous I/O, timeouts, and generating random values, \
         can only be performed while handling a request"
    )]
    NotInRequest,
}

/// A subrequest cap: either a fixed maximum or disabled entirely
/// (`limit === false` in spec terms).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Unlimited,
    Max(u32),
}

impl Limit {
    fn from_env(var: &str, default: u32) -> Limit {
        match std::env::var(var) {
            Ok(raw) => match raw.trim().parse::<i64>() {
                Ok(n) if n < 0 => Limit::Unlimited,
                Ok(n) => Limit::Max(n as u32),
                Err(_) => Limit::Max(default),
            },
            Err(_) => Limit::Max(default),
        }
    }
}

tokio::task_local! {
    static CURRENT: Arc<RequestContext>;
}

/// Ambient per-request state. Constructed once per incoming request and
/// installed for the dynamic scope of handling it via [`RequestContext::run`].
pub struct RequestContext {
    request_depth: u32,
    pipeline_depth: u32,
    external_subrequests: AtomicU32,
    internal_subrequests: AtomicU32,
    external_limit: Limit,
    internal_limit: Limit,
    pub input_gate: InputGate,
    pub output_gate: OutputGate,
}

impl RequestContext {
    /// Validates `request_depth ≤ 16` and `pipeline_depth ≤ 32` (spec §4.9).
    pub fn new(request_depth: u32, pipeline_depth: u32) -> Result<Self, ContextError> {
        if request_depth > MAX_REQUEST_DEPTH || pipeline_depth > MAX_PIPELINE_DEPTH {
            return Err(ContextError::DepthLimitExceeded);
        }
        Ok(Self {
            request_depth,
            pipeline_depth,
            external_subrequests: AtomicU32::new(0),
            internal_subrequests: AtomicU32::new(0),
            external_limit: Limit::from_env("MINIFLARE_SUBREQUEST_LIMIT", DEFAULT_EXTERNAL_LIMIT),
            internal_limit: Limit::from_env(
                "MINIFLARE_INTERNAL_SUBREQUEST_LIMIT",
                DEFAULT_INTERNAL_LIMIT,
            ),
            input_gate: InputGate::new(),
            output_gate: OutputGate::new(),
        })
    }

    pub fn request_depth(&self) -> u32 {
        self.request_depth
    }

    pub fn pipeline_depth(&self) -> u32 {
        self.pipeline_depth
    }

    /// Installs `self` as the ambient context for `f`'s dynamic scope.
    pub async fn run<R, F, Fut>(self: Arc<Self>, f: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        CURRENT.scope(self, f()).await
    }

    fn bump(counter: &AtomicU32, limit: Limit, n: u32) -> Result<(), ContextError> {
        let new_value = counter.fetch_add(n, Ordering::SeqCst) + n;
        if let Limit::Max(max) = limit {
            if new_value > max {
                return Err(ContextError::TooManySubrequests);
            }
        }
        Ok(())
    }
}

/// Clones a handle to the currently installed context, or `None` outside a
/// request's dynamic scope.
pub fn current() -> Option<Arc<RequestContext>> {
    CURRENT.try_with(|ctx| ctx.clone()).ok()
}

/// Raises [`ContextError::NotInRequest`] when no context is installed.
pub fn assert_in_request() -> Result<(), ContextError> {
    CURRENT.try_with(|_| ()).map_err(|_| ContextError::NotInRequest)
}

pub fn increment_external_subrequests(n: u32) -> Result<(), ContextError> {
    let ctx = current().ok_or(ContextError::NotInRequest)?;
    RequestContext::bump(&ctx.external_subrequests, ctx.external_limit, n)
}

pub fn increment_internal_subrequests(n: u32) -> Result<(), ContextError> {
    let ctx = current().ok_or(ContextError::NotInRequest)?;
    RequestContext::bump(&ctx.internal_subrequests, ctx.internal_limit, n)
}

/// Runs `f` with the ambient input gate closed, unless `allow_concurrency`
/// is set, in which case it runs directly against an open gate context.
pub async fn run_with_input_gate_closed<R, F, Fut>(
    allow_concurrency: bool,
    f: F,
) -> Result<R, ContextError>
where
    F: FnOnce(InputGate) -> Fut,
    Fut: Future<Output = R>,
{
    let ctx = current().ok_or(ContextError::NotInRequest)?;
    if allow_concurrency {
        Ok(f(ctx.input_gate.clone()).await)
    } else {
        Ok(ctx.input_gate.clone().run_with_closed(f).await)
    }
}

/// Registers `fut` with the ambient output gate unless `allow_unconfirmed`
/// is set, in which case it still runs but the caller won't wait for it.
pub fn wait_until_on_output_gate<F>(allow_unconfirmed: bool, fut: F) -> Result<(), ContextError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let ctx = current().ok_or(ContextError::NotInRequest)?;
    ctx.output_gate.spawn(fut, !allow_unconfirmed);
    Ok(())
}
