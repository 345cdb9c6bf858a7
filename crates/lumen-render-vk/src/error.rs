use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GfxError {
    /// Setup could not complete: missing adapter, extension, loader or a
    /// driver failure while building a component.
    #[error("initialization failed: {0}")]
    Init(String),

    /// The caller broke an API contract (zero size, out-of-range write,
    /// use after shutdown).
    #[error("contract violation: {0}")]
    Contract(String),

    /// A driver call failed outside of setup. Only stale-surface results are
    /// recovered by the frame engine; everything else lands here.
    #[error("{what} failed: {result}")]
    Driver {
        what: &'static str,
        result: vk::Result,
    },
}

pub type GfxResult<T> = Result<T, GfxError>;

impl GfxError {
    pub fn init(msg: impl Into<String>) -> Self {
        GfxError::Init(msg.into())
    }

    pub fn contract(msg: impl Into<String>) -> Self {
        GfxError::Contract(msg.into())
    }

    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            GfxError::Driver { result, .. } => Some(*result),
            _ => None,
        }
    }
}

pub(crate) trait VkResultExt<T> {
    /// Runtime driver failure.
    fn check(self, what: &'static str) -> GfxResult<T>;
    /// Driver failure while constructing a component.
    fn init_err(self, what: &'static str) -> GfxResult<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn check(self, what: &'static str) -> GfxResult<T> {
        self.map_err(|result| GfxError::Driver { what, result })
    }

    fn init_err(self, what: &'static str) -> GfxResult<T> {
        self.map_err(|result| GfxError::Init(format!("{what}: {result}")))
    }
}
