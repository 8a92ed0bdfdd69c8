//! End-to-end dispatch through the in-memory session store.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use embedded_shell_core::{
    ContextPropagator, FailureReason, Frame, Interruptible, Outcome, SessionState, SessionStore,
    ShellConfig,
};
use embedded_shell_executor::{CommandDescriptor, CommandRegistry, ContextKind, ParamSpec};
use embedded_shell_session::{DispatchError, Dispatcher, KvSessionStore};
use futures::StreamExt;

fn registry() -> CommandRegistry {
    CommandRegistry::build([
        CommandDescriptor::new("sum2", |inv| {
            let ctx = inv.require_context()?;
            let a = inv.args().int("a")?;
            let b = inv.args().int("b")?;
            ctx.printf(format!("{}", a + b));
            ctx.completed();
            Ok(())
        })
        .param(ParamSpec::context(ContextKind::Simple))
        .param(ParamSpec::int("a").long("add1"))
        .param(ParamSpec::int("b").long("add2").optional().default_value("1")),
        CommandDescriptor::new("broken", |_| anyhow::bail!("disk on fire")),
        CommandDescriptor::new("stall", |inv| {
            let ctx = Arc::clone(inv.require_context()?);
            thread::sleep(Duration::from_millis(400));
            ctx.printf("too late");
            Ok(())
        })
        .param(ParamSpec::context(ContextKind::Simple)),
        CommandDescriptor::new("spin", |inv| {
            let ctx = inv.require_progress()?;
            let mut step = 0;
            while !ctx.is_interrupted() && step < 500 {
                step += 1;
                ctx.printf_counted("working", 500, step);
                thread::sleep(Duration::from_millis(5));
            }
            if ctx.is_interrupted() {
                ctx.completed_with("interrupted");
            } else {
                ctx.completed();
            }
            Ok(())
        })
        .interruptible(Interruptible::Allow)
        .param(ParamSpec::context(ContextKind::Progress)),
        CommandDescriptor::new("steady", |inv| {
            let ctx = inv.require_context()?;
            thread::sleep(Duration::from_millis(100));
            ctx.completed_with(format!("interrupted={}", ctx.is_interrupted()));
            Ok(())
        })
        .param(ParamSpec::context(ContextKind::Simple)),
        CommandDescriptor::new("delegate", |inv| {
            let ctx = inv.require_context()?;
            inv.propagator().spawn_bound(ctx, |_| {
                let current = ContextPropagator::current().expect("bound in worker");
                current.printf("from worker");
                current.completed();
            })?;
            Ok(())
        })
        .param(ParamSpec::context(ContextKind::Simple)),
        CommandDescriptor::new("delegate_panic", |inv| {
            let ctx = inv.require_context()?;
            inv.propagator().spawn_bound(ctx, |ctx| {
                ctx.printf("worker started");
                panic!("worker lost its input");
            })?;
            Ok(())
        })
        .param(ParamSpec::context(ContextKind::Simple)),
    ])
    .unwrap()
}

fn dispatcher_with(config: ShellConfig) -> (Dispatcher, Arc<KvSessionStore>) {
    let store = Arc::new(KvSessionStore::standalone());
    let dispatcher = Dispatcher::new(
        registry(),
        Arc::clone(&store) as Arc<dyn SessionStore>,
        config,
    );
    (dispatcher, store)
}

fn dispatcher() -> (Dispatcher, Arc<KvSessionStore>) {
    dispatcher_with(ShellConfig::default())
}

#[tokio::test]
async fn test_sum2_streams_result() {
    let (dispatcher, store) = dispatcher();
    let handle = dispatcher.dispatch("s1", "sum2 -a 5").await.unwrap();

    let frames: Vec<Frame> = handle.frames().collect().await;
    assert_eq!(frames, vec![Frame::line("6"), Frame::Completed { message: None }]);
    assert_eq!(handle.wait().await, Outcome::Completed(None));

    let session = store.get("s1").await.unwrap().unwrap();
    assert_eq!(session.state, SessionState::Active);
}

#[tokio::test]
async fn test_long_options_and_override_default() {
    let (dispatcher, _) = dispatcher();
    let handle = dispatcher
        .dispatch("s1", "sum2 --add1 2 --add2 40")
        .await
        .unwrap();
    handle.wait().await;
    assert_eq!(handle.context().lines(), vec!["42"]);
}

#[tokio::test]
async fn test_lookup_and_bind_errors_create_no_context() {
    let (dispatcher, _) = dispatcher();

    let err = dispatcher.dispatch("s1", "sum3 -a 1").await.unwrap_err();
    assert!(matches!(err, DispatchError::CommandNotFound(_)));

    let err = dispatcher.dispatch("s1", "sum2").await.unwrap_err();
    assert_eq!(err.to_string(), "Argument error: missing required argument: a");

    let err = dispatcher.dispatch("s1", "sum2 -a foo").await.unwrap_err();
    assert_eq!(err.code(), "argument_format");

    assert!(dispatcher.active_invocations("s1").await.is_empty());
}

#[tokio::test]
async fn test_handler_error_fails_invocation() {
    let (dispatcher, _) = dispatcher();
    let handle = dispatcher.dispatch("s1", "broken").await.unwrap();
    assert_eq!(
        handle.wait().await,
        Outcome::Failed(FailureReason::HandlerError("disk on fire".into()))
    );
    let frames: Vec<Frame> = handle.frames().collect().await;
    assert!(matches!(frames.last(), Some(Frame::Failed { .. })));
}

#[tokio::test]
async fn test_timeout_finalizes_and_drops_late_output() {
    let config = ShellConfig {
        invocation_timeout_ms: 100,
        ..ShellConfig::default()
    };
    let (dispatcher, _) = dispatcher_with(config);
    let handle = dispatcher.dispatch("s1", "stall").await.unwrap();
    let id = handle.invocation_id();

    assert_eq!(
        handle.wait().await,
        Outcome::Failed(FailureReason::TimedOut)
    );

    // Let the handler wake up and attempt its late write.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(handle.context().lines().is_empty());
    assert!(!handle.context().printf("after"));
    assert!(dispatcher.context(id).await.is_none());
    assert!(dispatcher.propagator().lookup(id).is_none());

    let frames: Vec<Frame> = handle.frames().collect().await;
    assert_eq!(frames.iter().filter(|f| f.is_terminal()).count(), 1);
}

#[tokio::test]
async fn test_interrupt_allowed_command() {
    let (dispatcher, _) = dispatcher();
    let handle = dispatcher.dispatch("s1", "spin").await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(dispatcher.interrupt(handle.invocation_id()).await);
    assert_eq!(
        handle.wait().await,
        Outcome::Completed(Some("interrupted".into()))
    );
    assert!(handle.context().progress().is_some());
}

#[tokio::test]
async fn test_interrupt_ignored_for_non_interruptible() {
    let (dispatcher, _) = dispatcher();
    let handle = dispatcher.dispatch("s1", "steady").await.unwrap();

    assert!(!dispatcher.interrupt(handle.invocation_id()).await);
    assert_eq!(
        handle.wait().await,
        Outcome::Completed(Some("interrupted=false".into()))
    );
}

#[tokio::test]
async fn test_delegated_worker_completes() {
    let (dispatcher, _) = dispatcher();
    let handle = dispatcher.dispatch("s1", "delegate").await.unwrap();
    assert_eq!(handle.wait().await, Outcome::Completed(None));
    assert_eq!(handle.context().lines(), vec!["from worker"]);
}

#[tokio::test]
async fn test_delegated_worker_panic_fails_invocation() {
    let (dispatcher, _) = dispatcher();
    let handle = dispatcher.dispatch("s1", "delegate_panic").await.unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("worker panic should finish the invocation");
    assert_eq!(
        outcome,
        Outcome::Failed(FailureReason::HandlerError("worker lost its input".into()))
    );
    assert_eq!(handle.context().lines(), vec!["worker started"]);
}

#[tokio::test]
async fn test_parallel_invocations_stay_isolated() {
    let (dispatcher, _) = dispatcher();
    let mut handles = Vec::new();
    for i in 0..16 {
        handles.push(
            dispatcher
                .dispatch(&format!("s{i}"), &format!("sum2 -a {i} -b 0"))
                .await
                .unwrap(),
        );
    }
    for (i, handle) in handles.iter().enumerate() {
        handle.wait().await;
        assert_eq!(handle.context().lines(), vec![i.to_string()]);
        assert_eq!(handle.context().session_id(), format!("s{i}"));
    }
}

#[tokio::test]
async fn test_session_open_close() {
    let (dispatcher, store) = dispatcher();
    let session = dispatcher.open_session("s1").await.unwrap();
    assert!(session.is_active());
    assert!(store.get("s1").await.unwrap().is_some());

    let handle = dispatcher.dispatch("s1", "spin").await.unwrap();
    assert!(dispatcher.close_session("s1").await.unwrap());
    assert_eq!(
        handle.wait().await,
        Outcome::Completed(Some("interrupted".into()))
    );
    assert!(store.get("s1").await.unwrap().is_none());
    assert!(!dispatcher.close_session("s1").await.unwrap());
}

#[tokio::test]
async fn test_reaper_expires_then_removes() {
    let config = ShellConfig {
        session_ttl_secs: 1,
        ..ShellConfig::default()
    };
    let (dispatcher, store) = dispatcher_with(config);

    let mut idle = dispatcher.open_session("idle").await.unwrap();
    idle.last_active_at -= 1_500;
    store.put(&idle).await.unwrap();

    let mut stale = dispatcher.open_session("stale").await.unwrap();
    stale.expire();
    stale.last_active_at -= 5_000;
    store.put(&stale).await.unwrap();

    dispatcher.open_session("fresh").await.unwrap();

    let report = dispatcher.reap_expired_sessions().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.removed, 1);

    let idle = store.get("idle").await.unwrap().unwrap();
    assert_eq!(idle.state, SessionState::Expired);
    assert!(store.get("stale").await.unwrap().is_none());
    assert!(store.get("fresh").await.unwrap().unwrap().is_active());

    let err = dispatcher.dispatch("idle", "sum2 -a 1").await.unwrap_err();
    assert!(matches!(err, DispatchError::SessionExpired(_)));
}

#[tokio::test]
async fn test_help_lists_commands() {
    let (dispatcher, _) = dispatcher();
    let text = dispatcher.help(None).unwrap();
    assert!(text.contains("sum2"));
    assert!(text.contains("delegate"));
    assert!(dispatcher.help(Some("sum2")).unwrap().contains("--add1"));
    assert!(dispatcher.help(Some("missing")).is_err());
}

#[test]
fn test_spawn_bound_workers_see_own_context() {
    let propagator = ContextPropagator::new();
    let seen = Arc::new(AtomicUsize::new(0));
    let mut workers = Vec::new();
    for i in 0..8 {
        let ctx = Arc::new(embedded_shell_core::ExecutionContext::new(
            format!("s{i}"),
            "task",
            Interruptible::None,
        ));
        let seen = Arc::clone(&seen);
        let expected = ctx.invocation_id();
        workers.push(
            propagator
                .spawn_bound(&ctx, move |_| {
                    let current = ContextPropagator::current().unwrap();
                    if current.invocation_id() == expected {
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                })
                .unwrap(),
        );
    }
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(seen.load(Ordering::SeqCst), 8);
    assert_eq!(propagator.registered_count(), 0);
}
