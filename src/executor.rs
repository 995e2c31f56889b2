//! Batch execution strategies.
//!
//! One dispatch point owns the difference between pipeline and transaction
//! semantics, so the all-or-nothing guarantee is auditable in one place.

use std::time::Duration;

use tokio::time::timeout;
use tracing::debug;

use crate::command::{BatchMode, CommandBatch};
use crate::error::GatewayError;
use crate::pool::{PoolGuard, RespFailure};

/// Outcome of one command inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Reply(redis::Value),
    Failure(String),
}

/// Runs a decoded batch on one borrowed connection.
///
/// Results come back in command order, one per command. Command-level
/// failures are recorded inline and never abort the rest of a pipeline;
/// connection-level failures invalidate the borrowed connection and end the
/// whole request.
///
/// # Errors
/// `UpstreamUnavailable` when the connection breaks or a round-trip times
/// out; the guard is invalidated before returning.
pub async fn execute(
    guard: &mut PoolGuard,
    batch: &CommandBatch,
    command_timeout: Duration,
) -> Result<Vec<ExecutionResult>, GatewayError> {
    match batch.mode {
        BatchMode::Single | BatchMode::Pipeline => {
            execute_in_order(guard, batch, command_timeout).await
        }
        BatchMode::Transaction => execute_atomic(guard, batch, command_timeout).await,
    }
}

/// Single and pipeline modes: strictly ordered, independently failing.
async fn execute_in_order(
    guard: &mut PoolGuard,
    batch: &CommandBatch,
    command_timeout: Duration,
) -> Result<Vec<ExecutionResult>, GatewayError> {
    let mut results = Vec::with_capacity(batch.commands.len());

    for command in &batch.commands {
        let outcome = timeout(command_timeout, guard.transport().request(command)).await;
        match outcome {
            Ok(Ok(value)) => results.push(ExecutionResult::Reply(value)),
            Ok(Err(RespFailure::Command(message))) => {
                debug!(command = command.name(), "command failed: {message}");
                results.push(ExecutionResult::Failure(message));
            }
            Ok(Err(RespFailure::Connection(e))) => {
                guard.invalidate();
                return Err(GatewayError::UpstreamUnavailable(e.to_string()));
            }
            Err(_) => {
                guard.invalidate();
                return Err(GatewayError::UpstreamUnavailable(
                    "command timed out".to_string(),
                ));
            }
        }
    }

    Ok(results)
}

/// Transaction mode: one MULTI/EXEC round-trip; all commands apply or none.
async fn execute_atomic(
    guard: &mut PoolGuard,
    batch: &CommandBatch,
    command_timeout: Duration,
) -> Result<Vec<ExecutionResult>, GatewayError> {
    if batch.commands.is_empty() {
        return Ok(Vec::new());
    }

    let outcome = timeout(
        command_timeout,
        guard.transport().transaction(&batch.commands),
    )
    .await;
    match outcome {
        Ok(Ok(replies)) => {
            if replies.len() != batch.commands.len() {
                guard.invalidate();
                return Err(GatewayError::UpstreamUnavailable(format!(
                    "transaction reply count mismatch: {} commands, {} replies",
                    batch.commands.len(),
                    replies.len()
                )));
            }
            Ok(replies.into_iter().map(ExecutionResult::Reply).collect())
        }
        // A queue-time error aborts the whole block; every command reports
        // the same abort reason.
        Ok(Err(RespFailure::Command(message))) => {
            debug!("transaction aborted: {message}");
            let message = format!("transaction aborted: {message}");
            Ok(batch
                .commands
                .iter()
                .map(|_| ExecutionResult::Failure(message.clone()))
                .collect())
        }
        Ok(Err(RespFailure::Connection(e))) => {
            guard.invalidate();
            Err(GatewayError::UpstreamUnavailable(e.to_string()))
        }
        Err(_) => {
            guard.invalidate();
            Err(GatewayError::UpstreamUnavailable(
                "transaction timed out".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::pool::{ConnectionPool, Dialer, PoolConfig, RespTransport};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    type Scripted = Arc<Mutex<VecDeque<Result<redis::Value, RespFailure>>>>;

    struct ScriptedTransport {
        replies: Scripted,
        seen: Arc<Mutex<Vec<String>>>,
    }

    fn connection_lost() -> RespFailure {
        RespFailure::Connection(redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "gone",
        )))
    }

    #[async_trait]
    impl RespTransport for ScriptedTransport {
        async fn request(&mut self, command: &Command) -> Result<redis::Value, RespFailure> {
            self.seen.lock().push(command.name().to_string());
            self.replies.lock().pop_front().unwrap_or(Ok(redis::Value::Nil))
        }

        async fn transaction(
            &mut self,
            commands: &[Command],
        ) -> Result<Vec<redis::Value>, RespFailure> {
            for command in commands {
                self.seen.lock().push(command.name().to_string());
            }
            match self.replies.lock().pop_front() {
                Some(Ok(value)) => match value {
                    redis::Value::Bulk(items) => Ok(items),
                    other => Ok(vec![other]),
                },
                Some(Err(e)) => Err(e),
                None => Ok(commands.iter().map(|_| redis::Value::Nil).collect()),
            }
        }
    }

    struct ScriptedDialer {
        replies: Scripted,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Dialer for ScriptedDialer {
        async fn dial(&self) -> Result<Box<dyn RespTransport>, RespFailure> {
            Ok(Box::new(ScriptedTransport {
                replies: Arc::clone(&self.replies),
                seen: Arc::clone(&self.seen),
            }))
        }
    }

    struct Rig {
        pool: ConnectionPool,
        replies: Scripted,
        seen: Arc<Mutex<Vec<String>>>,
    }

    fn rig() -> Rig {
        let replies: Scripted = Arc::new(Mutex::new(VecDeque::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dialer = ScriptedDialer {
            replies: Arc::clone(&replies),
            seen: Arc::clone(&seen),
        };
        Rig {
            pool: ConnectionPool::new(Box::new(dialer), PoolConfig::default()),
            replies,
            seen,
        }
    }

    fn batch(mode: BatchMode, commands: &[&[&str]]) -> CommandBatch {
        CommandBatch {
            mode,
            commands: commands
                .iter()
                .map(|parts| {
                    Command::new(parts.iter().map(ToString::to_string).collect()).unwrap()
                })
                .collect(),
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_pipeline_failure_does_not_abort_rest() {
        let rig = rig();
        rig.replies.lock().extend([
            Ok(redis::Value::Okay),
            Err(RespFailure::Command("WRONGTYPE".to_string())),
            Ok(redis::Value::Data(b"bar".to_vec())),
        ]);

        let batch = batch(
            BatchMode::Pipeline,
            &[&["SET", "foo", "bar"], &["LPUSH", "foo", "x"], &["GET", "foo"]],
        );
        let mut guard = rig.pool.acquire().await.unwrap();
        let results = execute(&mut guard, &batch, TIMEOUT).await.unwrap();

        assert_eq!(
            results,
            vec![
                ExecutionResult::Reply(redis::Value::Okay),
                ExecutionResult::Failure("WRONGTYPE".to_string()),
                ExecutionResult::Reply(redis::Value::Data(b"bar".to_vec())),
            ]
        );
        assert_eq!(*rig.seen.lock(), ["SET", "LPUSH", "GET"]);
    }

    #[tokio::test]
    async fn test_connection_failure_invalidates_and_aborts() {
        let rig = rig();
        rig.replies
            .lock()
            .extend([Ok(redis::Value::Okay), Err(connection_lost())]);

        let batch = batch(
            BatchMode::Pipeline,
            &[&["SET", "a", "1"], &["SET", "b", "2"], &["SET", "c", "3"]],
        );
        let mut guard = rig.pool.acquire().await.unwrap();
        let err = execute(&mut guard, &batch, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable(_)));

        drop(guard);
        assert_eq!(rig.pool.idle_count(), 0, "broken connection not parked");
    }

    #[tokio::test]
    async fn test_command_failure_keeps_connection() {
        let rig = rig();
        rig.replies
            .lock()
            .push_back(Err(RespFailure::Command("ERR bad arity".to_string())));

        let batch = batch(BatchMode::Single, &[&["GET"]]);
        let mut guard = rig.pool.acquire().await.unwrap();
        let results = execute(&mut guard, &batch, TIMEOUT).await.unwrap();
        assert_eq!(
            results,
            vec![ExecutionResult::Failure("ERR bad arity".to_string())]
        );

        drop(guard);
        assert_eq!(rig.pool.idle_count(), 1, "connection reusable after command error");
    }

    #[tokio::test]
    async fn test_transaction_replies_in_order() {
        let rig = rig();
        rig.replies.lock().push_back(Ok(redis::Value::Bulk(vec![
            redis::Value::Okay,
            redis::Value::Int(2),
        ])));

        let batch = batch(
            BatchMode::Transaction,
            &[&["SET", "n", "1"], &["INCR", "n"]],
        );
        let mut guard = rig.pool.acquire().await.unwrap();
        let results = execute(&mut guard, &batch, TIMEOUT).await.unwrap();
        assert_eq!(
            results,
            vec![
                ExecutionResult::Reply(redis::Value::Okay),
                ExecutionResult::Reply(redis::Value::Int(2)),
            ]
        );
    }

    #[tokio::test]
    async fn test_transaction_abort_is_uniform() {
        let rig = rig();
        rig.replies.lock().push_back(Err(RespFailure::Command(
            "EXECABORT Transaction discarded because of previous errors.".to_string(),
        )));

        let batch = batch(
            BatchMode::Transaction,
            &[&["SET", "a", "1"], &["BOGUS"], &["SET", "b", "2"]],
        );
        let mut guard = rig.pool.acquire().await.unwrap();
        let results = execute(&mut guard, &batch, TIMEOUT).await.unwrap();

        assert_eq!(results.len(), 3);
        let expected = ExecutionResult::Failure(
            "transaction aborted: EXECABORT Transaction discarded because of previous errors."
                .to_string(),
        );
        assert!(results.iter().all(|r| *r == expected));
    }

    struct SlowTransport;

    #[async_trait]
    impl RespTransport for SlowTransport {
        async fn request(&mut self, _command: &Command) -> Result<redis::Value, RespFailure> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(redis::Value::Nil)
        }

        async fn transaction(
            &mut self,
            _commands: &[Command],
        ) -> Result<Vec<redis::Value>, RespFailure> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    struct SlowDialer;

    #[async_trait]
    impl Dialer for SlowDialer {
        async fn dial(&self) -> Result<Box<dyn RespTransport>, RespFailure> {
            Ok(Box::new(SlowTransport))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_timeout_invalidates_connection() {
        let pool = ConnectionPool::new(Box::new(SlowDialer), PoolConfig::default());
        let batch = batch(BatchMode::Single, &[&["GET", "foo"]]);

        let mut guard = pool.acquire().await.unwrap();
        let err = execute(&mut guard, &batch, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable(_)));

        drop(guard);
        assert_eq!(pool.idle_count(), 0, "timed-out connection not parked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transaction_timeout_invalidates_connection() {
        let pool = ConnectionPool::new(Box::new(SlowDialer), PoolConfig::default());
        let batch = batch(BatchMode::Transaction, &[&["SET", "a", "1"]]);

        let mut guard = pool.acquire().await.unwrap();
        let err = execute(&mut guard, &batch, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamUnavailable(_)));

        drop(guard);
        assert_eq!(pool.idle_count(), 0, "timed-out connection not parked");
    }

    #[tokio::test]
    async fn test_empty_transaction_skips_upstream() {
        let rig = rig();
        let batch = batch(BatchMode::Transaction, &[]);
        let mut guard = rig.pool.acquire().await.unwrap();
        let results = execute(&mut guard, &batch, TIMEOUT).await.unwrap();
        assert!(results.is_empty());
        assert!(rig.seen.lock().is_empty());
    }
}
