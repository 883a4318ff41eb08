//! Operators used by the demo pipeline

use async_trait::async_trait;
use iteration::{IterationError, Operator, RoundContext};

/// Multiplies every record of gate 0 by `factor` and emits it on output 0
pub struct Scale {
    factor: u64,
    seen: u64,
}

impl Scale {
    pub fn boxed(factor: u64) -> Box<dyn Operator<u64>> {
        Box::new(Self { factor, seen: 0 })
    }
}

#[async_trait]
impl Operator<u64> for Scale {
    async fn run(&mut self, ctx: &mut RoundContext<'_, u64>) -> Result<(), IterationError> {
        while let Some(record) = ctx.next_record(0).await? {
            let scaled = record.checked_mul(self.factor).ok_or_else(|| {
                IterationError::operator(format!("{record} * {} overflows", self.factor))
            })?;
            ctx.emit(0, scaled).await?;
            self.seen += 1;
        }
        tracing::debug!(
            task_id = %ctx.task_id(),
            round = ctx.round(),
            records = self.seen,
            "operator round done"
        );
        Ok(())
    }
}
