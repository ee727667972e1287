use anyhow::Result;
use common_kafka::transaction::TransactionalProducer;

/// Transaction boundaries wrapped around each listener invocation.
pub trait TransactionDemarcation: Send + Sync {
    fn begin(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn abort(&self) -> Result<()>;
}

impl TransactionDemarcation for TransactionalProducer {
    fn begin(&self) -> Result<()> {
        TransactionalProducer::begin(self)?;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        TransactionalProducer::commit(self)?;
        Ok(())
    }

    fn abort(&self) -> Result<()> {
        TransactionalProducer::abort(self)?;
        Ok(())
    }
}
