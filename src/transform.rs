use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::{BoxError, CsvError, CsvResult, Row};

type SyncTransformFn = Box<dyn FnMut(Row) -> Result<Option<Row>, BoxError> + Send>;
type AsyncTransformFn = Box<dyn FnMut(Row) -> BoxFuture<'static, Result<Option<Row>, BoxError>> + Send>;
type SyncValidateFn = Box<dyn FnMut(&Row) -> Result<RowValidation, BoxError> + Send>;
type AsyncValidateFn = Box<dyn FnMut(Row) -> BoxFuture<'static, Result<RowValidation, BoxError>> + Send>;

/// User row transform. `Ok(None)` suppresses the row.
pub enum RowTransform {
    Sync(SyncTransformFn),
    Async(AsyncTransformFn),
}

impl RowTransform {
    pub fn sync<F>(f: F) -> Self
    where
        F: FnMut(Row) -> Result<Option<Row>, BoxError> + Send + 'static,
    {
        RowTransform::Sync(Box::new(f))
    }

    pub fn from_async<F, Fut>(mut f: F) -> Self
    where
        F: FnMut(Row) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<Row>, BoxError>> + Send + 'static,
    {
        RowTransform::Async(Box::new(move |row| f(row).boxed()))
    }
}

/// User row validator. It always sees the transformed row.
pub enum RowValidator {
    Sync(SyncValidateFn),
    /// Receives its own copy of the row.
    Async(AsyncValidateFn),
}

impl RowValidator {
    pub fn sync<F, V>(mut f: F) -> Self
    where
        F: FnMut(&Row) -> Result<V, BoxError> + Send + 'static,
        V: Into<RowValidation>,
    {
        RowValidator::Sync(Box::new(move |row| f(row).map(Into::<RowValidation>::into)))
    }

    pub fn from_async<F, Fut, V>(mut f: F) -> Self
    where
        F: FnMut(Row) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, BoxError>> + Send + 'static,
        V: Into<RowValidation>,
    {
        RowValidator::Async(Box::new(move |row| {
            f(row)
                .map(|r| r.map(Into::<RowValidation>::into))
                .boxed()
        }))
    }
}

/// Verdict of a validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowValidation {
    pub is_valid: bool,
    pub reason: Option<String>,
}

impl RowValidation {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.into()),
        }
    }
}

impl From<bool> for RowValidation {
    fn from(is_valid: bool) -> Self {
        Self {
            is_valid,
            reason: None,
        }
    }
}

impl<S: Into<String>> From<(bool, S)> for RowValidation {
    fn from((is_valid, reason): (bool, S)) -> Self {
        Self {
            is_valid,
            reason: Some(reason.into()),
        }
    }
}

/// What the pipeline decided for one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Emit(Row),
    Invalid { row: Row, reason: Option<String> },
    /// The transform returned no row.
    Suppressed,
}

/// Transform then validate, one row at a time.
#[derive(Default)]
pub struct RowPipeline {
    transform: Option<RowTransform>,
    validator: Option<RowValidator>,
}

impl RowPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_transform(&mut self, transform: RowTransform) {
        self.transform = Some(transform);
    }

    pub fn set_validator(&mut self, validator: RowValidator) {
        self.validator = Some(validator);
    }

    /// Errors and panics from either callback come back as `Err`, never both a
    /// value and an error.
    pub async fn transform_and_validate(&mut self, row: Row) -> CsvResult<RowOutcome> {
        let Some(row) = self.transform_row(row).await? else {
            return Ok(RowOutcome::Suppressed);
        };
        let validation = self.validate_row(&row).await?;
        if validation.is_valid {
            Ok(RowOutcome::Emit(row))
        } else {
            Ok(RowOutcome::Invalid {
                row,
                reason: validation.reason,
            })
        }
    }

    async fn transform_row(&mut self, row: Row) -> CsvResult<Option<Row>> {
        match &mut self.transform {
            None => Ok(Some(row)),
            Some(RowTransform::Sync(f)) => catch_unwind(AssertUnwindSafe(|| f(row)))
                .map_err(panic_error)?
                .map_err(CsvError::Callback),
            Some(RowTransform::Async(f)) => {
                let fut = catch_unwind(AssertUnwindSafe(|| f(row))).map_err(panic_error)?;
                AssertUnwindSafe(fut)
                    .catch_unwind()
                    .await
                    .map_err(panic_error)?
                    .map_err(CsvError::Callback)
            }
        }
    }

    async fn validate_row(&mut self, row: &Row) -> CsvResult<RowValidation> {
        match &mut self.validator {
            None => Ok(RowValidation::valid()),
            Some(RowValidator::Sync(f)) => catch_unwind(AssertUnwindSafe(|| f(row)))
                .map_err(panic_error)?
                .map_err(CsvError::Callback),
            Some(RowValidator::Async(f)) => {
                let fut = catch_unwind(AssertUnwindSafe(|| f(row.clone()))).map_err(panic_error)?;
                AssertUnwindSafe(fut)
                    .catch_unwind()
                    .await
                    .map_err(panic_error)?
                    .map_err(CsvError::Callback)
            }
        }
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> CsvError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    CsvError::CallbackPanic(message)
}
