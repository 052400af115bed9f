use super::*;
use crate::collect::CollectOperation;
use crate::page_downstream::BufferedPageDownstream;
use std::sync::Barrier;
use std::sync::atomic::AtomicUsize;
use std::thread;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const WAIT: Duration = Duration::from_secs(5);

fn new_context() -> JobExecutionContext {
    JobExecutionContext::new(JobId::random(), KEEP_ALIVE)
}

fn downstream(name: &str) -> Arc<BufferedPageDownstream> {
    Arc::new(BufferedPageDownstream::new(name, 1))
}

fn same(a: &SharedPageDownstream, b: &Arc<BufferedPageDownstream>) -> bool {
    let b: SharedPageDownstream = b.clone();
    Arc::ptr_eq(a, &b)
}

fn resolved(fut: &PageDownstreamFuture) -> Option<Result<SharedPageDownstream>> {
    fut.clone().now_or_never()
}

#[derive(Debug, Default)]
struct CountingCollect {
    kills: AtomicUsize,
    fail: bool,
}

impl CollectOperation for CountingCollect {
    fn kill(&self) -> Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DqeError::Execution("collector stuck".to_string()));
        }
        Ok(())
    }
}

fn context_with_collector(fail: bool) -> (JobExecutionContext, Arc<CountingCollect>) {
    let job_id = JobId::random();
    let collect = JobCollectContext::new(job_id);
    let op = Arc::new(CountingCollect {
        fail,
        ..CountingCollect::default()
    });
    collect
        .register_collector(ExecutionNodeId(0), op.clone())
        .expect("register collector");
    (
        JobExecutionContext::with_collect_context(job_id, KEEP_ALIVE, collect),
        op,
    )
}

#[test]
fn lookup_before_registration_then_duplicate_fails() {
    let ctx = new_context();
    let fut = ctx.get_page_downstream_context(ExecutionNodeId(5));
    assert!(fut.is_waiting_for_registration());
    assert!(resolved(&fut).is_none());

    let a = downstream("a");
    ctx.set_page_downstream_context(ExecutionNodeId(5), a.clone())
        .expect("register");
    let got = resolved(&fut).expect("resolved").expect("context");
    assert!(same(&got, &a));
    assert_eq!(ctx.num_pending_lookups(), 0);

    let err = ctx
        .set_page_downstream_context(ExecutionNodeId(5), downstream("b"))
        .expect_err("duplicate");
    match err {
        DqeError::IllegalState(msg) => assert!(msg.contains("execution node 5"), "{msg}"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn duplicate_registration_keeps_first_context() {
    let ctx = new_context();
    let first = downstream("first");
    ctx.set_page_downstream_context(ExecutionNodeId(1), first.clone())
        .expect("register");
    assert!(
        ctx.set_page_downstream_context(ExecutionNodeId(1), downstream("second"))
            .is_err()
    );
    let got = resolved(&ctx.get_page_downstream_context(ExecutionNodeId(1)))
        .expect("ready")
        .expect("context");
    assert!(same(&got, &first));
    assert_eq!(ctx.num_page_downstreams(), 1);
}

#[test]
fn lookup_after_registration_is_immediately_ready() {
    let ctx = new_context();
    let x = downstream("x");
    ctx.set_page_downstream_context(ExecutionNodeId(2), x.clone())
        .expect("register");

    let fut = ctx.get_page_downstream_context(ExecutionNodeId(2));
    assert!(!fut.is_waiting_for_registration());
    assert_eq!(ctx.num_pending_lookups(), 0);
    let got = resolved(&fut).expect("ready").expect("context");
    assert!(same(&got, &x));
}

#[test]
fn never_accessed_context_reports_sentinel() {
    let ctx = new_context();
    assert_eq!(ctx.last_access_time(), NEVER_ACCESSED);
    assert_eq!(ctx.last_access_time(), -1);
    ctx.accessed(1_000);
    ctx.accessed(2_500);
    assert_eq!(ctx.last_access_time(), 2_500);
    assert_eq!(ctx.keep_alive(), KEEP_ALIVE);
}

#[test]
fn lookups_for_same_id_share_one_pending_future() {
    let ctx = new_context();
    let a = ctx.get_page_downstream_context(ExecutionNodeId(3));
    let b = ctx.get_page_downstream_context(ExecutionNodeId(3));
    let other = ctx.get_page_downstream_context(ExecutionNodeId(4));
    assert!(a.shares_registration_with(&b));
    assert!(!a.shares_registration_with(&other));
    assert_eq!(ctx.num_pending_lookups(), 2);

    let c = downstream("c");
    ctx.set_page_downstream_context(ExecutionNodeId(3), c.clone())
        .expect("register");
    assert!(same(&resolved(&a).expect("a").expect("ctx"), &c));
    assert!(same(&resolved(&b).expect("b").expect("ctx"), &c));
    assert!(resolved(&other).is_none());
    assert_eq!(ctx.num_pending_lookups(), 1);
}

#[test]
fn concurrent_lookups_observe_one_future() {
    let ctx = Arc::new(new_context());
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles = (0..threads)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ctx.get_page_downstream_context(ExecutionNodeId(9))
            })
        })
        .collect::<Vec<_>>();
    let futures = handles
        .into_iter()
        .map(|h| h.join().expect("lookup thread"))
        .collect::<Vec<_>>();

    assert_eq!(ctx.num_pending_lookups(), 1);
    for f in &futures[1..] {
        assert!(futures[0].shares_registration_with(f));
    }

    let d = downstream("d");
    ctx.set_page_downstream_context(ExecutionNodeId(9), d.clone())
        .expect("register");
    for f in &futures {
        assert!(same(&resolved(f).expect("resolved").expect("ctx"), &d));
    }
}

#[test]
fn racing_register_and_lookup_always_meet() {
    for round in 0..200 {
        let ctx = Arc::new(new_context());
        let id = ExecutionNodeId(round);
        let barrier = Arc::new(Barrier::new(2));
        let target = downstream("race");

        let producer = {
            let ctx = Arc::clone(&ctx);
            let barrier = Arc::clone(&barrier);
            let target = target.clone();
            thread::spawn(move || {
                barrier.wait();
                ctx.set_page_downstream_context(id, target)
            })
        };
        let consumer = {
            let ctx = Arc::clone(&ctx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ctx.get_page_downstream_context(id)
            })
        };

        producer.join().expect("producer").expect("register");
        let fut = consumer.join().expect("consumer");
        let got = resolved(&fut)
            .unwrap_or_else(|| panic!("round {round}: lookup left pending"))
            .expect("context");
        assert!(same(&got, &target));
        assert_eq!(ctx.num_pending_lookups(), 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waiter_on_other_task_is_woken_by_registration() {
    let ctx = Arc::new(new_context());
    let fut = ctx.get_page_downstream_context(ExecutionNodeId(11));
    let waiter = tokio::spawn(fut);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let e = downstream("e");
    ctx.set_page_downstream_context(ExecutionNodeId(11), e.clone())
        .expect("register");

    let got = tokio::time::timeout(WAIT, waiter)
        .await
        .expect("waiter timed out")
        .expect("join")
        .expect("context");
    assert!(same(&got, &e));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn continuation_may_call_back_into_context() {
    let ctx = Arc::new(new_context());
    let fut = ctx.get_page_downstream_context(ExecutionNodeId(1));
    let callback_ctx = Arc::clone(&ctx);
    let continuation = tokio::spawn(async move {
        let upstream = fut.await?;
        // forward to the next stage, which is not registered yet
        let next = callback_ctx.get_page_downstream_context(ExecutionNodeId(2));
        callback_ctx.close_page_downstream_context(ExecutionNodeId(1));
        Ok::<_, DqeError>((upstream, next))
    });

    ctx.set_page_downstream_context(ExecutionNodeId(1), downstream("stage-1"))
        .expect("register");
    let (upstream, next) = tokio::time::timeout(WAIT, continuation)
        .await
        .expect("continuation deadlocked")
        .expect("join")
        .expect("continuation");
    assert_eq!(upstream.name(), "stage-1");
    assert!(next.is_waiting_for_registration());

    ctx.set_page_downstream_context(ExecutionNodeId(2), downstream("stage-2"))
        .expect("register");
    let second = tokio::time::timeout(WAIT, next)
        .await
        .expect("next")
        .expect("ctx");
    assert_eq!(second.name(), "stage-2");
}

#[test]
fn close_entry_forgets_registration() {
    let ctx = new_context();
    ctx.set_page_downstream_context(ExecutionNodeId(7), downstream("old"))
        .expect("register");
    assert!(ctx.close_page_downstream_context(ExecutionNodeId(7)));
    assert!(!ctx.close_page_downstream_context(ExecutionNodeId(7)));
    assert!(!ctx.close_page_downstream_context(ExecutionNodeId(99)));

    let fut = ctx.get_page_downstream_context(ExecutionNodeId(7));
    assert!(fut.is_waiting_for_registration());
    assert!(resolved(&fut).is_none());

    let fresh = downstream("fresh");
    ctx.set_page_downstream_context(ExecutionNodeId(7), fresh.clone())
        .expect("re-register after close");
    assert!(same(&resolved(&fut).expect("resolved").expect("ctx"), &fresh));
}

#[test]
fn close_entry_leaves_other_pending_lookups() {
    let ctx = new_context();
    let waiting = ctx.get_page_downstream_context(ExecutionNodeId(2));
    ctx.set_page_downstream_context(ExecutionNodeId(1), downstream("one"))
        .expect("register");
    ctx.close_page_downstream_context(ExecutionNodeId(1));
    assert_eq!(ctx.num_pending_lookups(), 1);
    assert!(resolved(&waiting).is_none());
}

#[test]
fn close_releases_collect_context_once() {
    let (ctx, op) = context_with_collector(false);
    let ctx = Arc::new(ctx);
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles = (0..threads)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ctx.close()
            })
        })
        .collect::<Vec<_>>();
    for h in handles {
        h.join().expect("close thread").expect("close");
    }
    ctx.close().expect("late close");

    assert_eq!(op.kills.load(Ordering::SeqCst), 1);
    assert!(ctx.is_closed());
    assert!(ctx.collect_context().is_closed());
}

#[test]
fn release_failure_is_reported_once() {
    let (ctx, op) = context_with_collector(true);
    let err = ctx.close().expect_err("release failure");
    assert!(matches!(err, DqeError::Execution(msg) if msg.contains("collector stuck")));
    ctx.close().expect("second close does not retry");
    assert_eq!(op.kills.load(Ordering::SeqCst), 1);
}

#[test]
fn close_fails_pending_lookups_and_kills_registered_contexts() {
    let ctx = new_context();
    let job_id = ctx.id();
    let waiting = ctx.get_page_downstream_context(ExecutionNodeId(1));
    let registered = downstream("registered");
    ctx.set_page_downstream_context(ExecutionNodeId(2), registered.clone())
        .expect("register");

    ctx.close().expect("close");

    match resolved(&waiting).expect("resolved on close") {
        Err(DqeError::JobClosed(id)) => assert_eq!(id, job_id),
        other => panic!("unexpected {other:?}"),
    }
    assert!(registered.is_killed());
    assert_eq!(ctx.num_page_downstreams(), 0);
    assert_eq!(ctx.num_pending_lookups(), 0);
}

#[test]
fn closed_context_rejects_registration_and_lookup() {
    let ctx = new_context();
    ctx.close().expect("close");

    let err = ctx
        .set_page_downstream_context(ExecutionNodeId(1), downstream("late"))
        .expect_err("closed");
    assert!(matches!(err, DqeError::IllegalState(msg) if msg.contains("is closed")));

    let fut = ctx.get_page_downstream_context(ExecutionNodeId(1));
    assert!(matches!(
        resolved(&fut),
        Some(Err(DqeError::JobClosed(_)))
    ));
    assert_eq!(ctx.num_pending_lookups(), 0);
}

#[test]
fn registration_racing_close_never_leaks() {
    for round in 0..100 {
        let ctx = Arc::new(new_context());
        let barrier = Arc::new(Barrier::new(2));
        let target = downstream("racer");
        let producer = {
            let ctx = Arc::clone(&ctx);
            let barrier = Arc::clone(&barrier);
            let target = target.clone();
            thread::spawn(move || {
                barrier.wait();
                ctx.set_page_downstream_context(ExecutionNodeId(round), target)
            })
        };
        let closer = {
            let ctx = Arc::clone(&ctx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ctx.close()
            })
        };
        let registered = producer.join().expect("producer");
        closer.join().expect("closer").expect("close");

        // whichever side won, nothing stays registered and the context is killed
        assert_eq!(ctx.num_page_downstreams(), 0, "round {round}");
        assert!(target.is_killed() || registered.is_err(), "round {round}");
    }
}

#[test]
fn lookup_racing_close_always_fails_with_job_closed() {
    for round in 0..200 {
        let ctx = Arc::new(new_context());
        let barrier = Arc::new(Barrier::new(2));
        let consumer = {
            let ctx = Arc::clone(&ctx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ctx.get_page_downstream_context(ExecutionNodeId(round))
            })
        };
        let closer = {
            let ctx = Arc::clone(&ctx);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ctx.close()
            })
        };
        let lookup = consumer.join().expect("consumer");
        closer.join().expect("closer").expect("close");

        // either abandoned by close or created after it; never left waiting
        assert_eq!(ctx.num_pending_lookups(), 0, "round {round}");
        match resolved(&lookup) {
            Some(Err(DqeError::JobClosed(id))) => assert_eq!(id, ctx.id(), "round {round}"),
            other => panic!("round {round}: expected closed job, got {other:?}"),
        }
    }
}
