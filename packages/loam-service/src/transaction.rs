use std::{future::Future, pin::Pin};

use tracing::{error, warn};

use crate::{Error, Result};

pub type ActionFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
pub type Action = Box<dyn FnOnce() -> ActionFuture + Send>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionState {
	Pending,
	Committed,
	RolledBack,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RollbackReport {
	pub attempted: usize,
	pub failed: usize,
}

struct Operation {
	forward: Option<Action>,
	rollback: Option<Action>,
}

/// A compensation log for multi-backend writes that cannot share a native
/// transaction. Forward actions run in insertion order on commit; on the
/// first failure the rollbacks of every executed action run in reverse
/// order, and the original error is re-raised. The log owns no connections
/// and can be built without a provider.
pub struct MemoryTransaction {
	operations: Vec<Operation>,
	state: TransactionState,
	executed: usize,
}
impl MemoryTransaction {
	pub fn new() -> Self {
		Self { operations: Vec::new(), state: TransactionState::Pending, executed: 0 }
	}

	pub fn state(&self) -> TransactionState {
		self.state
	}

	pub fn len(&self) -> usize {
		self.operations.len()
	}

	pub fn is_empty(&self) -> bool {
		self.operations.is_empty()
	}

	/// Appends a `(forward, rollback)` pair. The log is append-only and
	/// frozen once committed or rolled back.
	pub fn add_operation(&mut self, forward: Action, rollback: Action) -> Result<()> {
		if self.state != TransactionState::Pending {
			return Err(Error::InvalidState {
				message: format!(
					"Cannot add operations to a {:?} transaction.",
					self.state
				),
			});
		}

		self.operations.push(Operation { forward: Some(forward), rollback: Some(rollback) });

		Ok(())
	}

	/// Runs every forward action in order. On failure the executed prefix is
	/// rolled back and the original error is surfaced.
	pub async fn commit(&mut self) -> Result<()> {
		if self.state != TransactionState::Pending {
			return Err(Error::InvalidState {
				message: format!("Cannot commit a {:?} transaction.", self.state),
			});
		}

		for index in 0..self.operations.len() {
			let Some(forward) = self.operations[index].forward.take() else { continue };

			if let Err(err) = forward().await {
				error!(index, error = %err, "Forward action failed; rolling back.");
				self.rollback_executed().await;

				self.state = TransactionState::RolledBack;

				return Err(Error::TransactionFailed { index, message: err.to_string() });
			}

			self.executed = index + 1;
		}

		self.state = TransactionState::Committed;

		Ok(())
	}

	/// Idempotent. Runs the rollback actions of executed operations in
	/// reverse order; individual failures are logged and counted but do not
	/// abort the traversal.
	pub async fn rollback(&mut self) -> Result<RollbackReport> {
		match self.state {
			TransactionState::Committed => Err(Error::InvalidState {
				message: "Cannot roll back a committed transaction.".to_string(),
			}),
			TransactionState::RolledBack => Ok(RollbackReport::default()),
			TransactionState::Pending => {
				let report = self.rollback_executed().await;

				self.state = TransactionState::RolledBack;

				Ok(report)
			},
		}
	}

	async fn rollback_executed(&mut self) -> RollbackReport {
		let mut report = RollbackReport::default();

		for index in (0..self.executed).rev() {
			let Some(rollback) = self.operations[index].rollback.take() else { continue };

			report.attempted += 1;

			if let Err(err) = rollback().await {
				warn!(index, error = %err, "Rollback action failed.");

				report.failed += 1;
			}
		}

		report
	}
}
impl Default for MemoryTransaction {
	fn default() -> Self {
		Self::new()
	}
}

/// Wrap a plain async closure as a transaction action.
pub fn action<F, Fut>(f: F) -> Action
where
	F: FnOnce() -> Fut + Send + 'static,
	Fut: Future<Output = Result<()>> + Send + 'static,
{
	Box::new(move || Box::pin(f()))
}
