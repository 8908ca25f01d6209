use crossbeam::channel::{unbounded, Receiver};
use jobpool::config::PoolConfig;
use jobpool::log::FileLog;
use jobpool::pool::Pool;
use jobpool::task::Task;
use jobpool::thread::ThreadResult;
use jobpool::{Error, ErrorKind};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(10);

fn pool(name: &str, size: usize) -> Pool {
    Pool::new(PoolConfig::new(name, size).with_sleep(Duration::from_millis(1))).unwrap()
}

// occupies one worker until the returned sender is dropped or sent to
fn blocker(pool: &Pool) -> crossbeam::channel::Sender<()> {
    let (release, wait) = unbounded::<()>();
    let (started, running) = unbounded::<()>();
    pool.add_task(
        i32::MIN,
        Task::new("blocker").on_start(move |_| {
            started.send(()).unwrap();
            let _ = wait.recv();
            Ok(())
        }),
    )
    .unwrap();
    running.recv_timeout(TIMEOUT).unwrap();
    release
}

fn recorder(order: &Arc<Mutex<Vec<u64>>>, id: u64) -> Task {
    let order = order.clone();
    Task::new(format!("record {}", id)).on_start(move |_| {
        order.lock().unwrap().push(id);
        Ok(())
    })
}

#[test]
fn lower_priority_number_runs_first() {
    let pool = pool("order", 1);
    let release = blocker(&pool);
    let order = Arc::new(Mutex::new(Vec::new()));

    let a = pool.add_task(5, recorder(&order, 1)).unwrap();
    let b = pool.add_task(1, recorder(&order, 2)).unwrap();
    let c = pool.add_task(5, recorder(&order, 3)).unwrap();
    assert!(a.id() < b.id() && b.id() < c.id());
    assert_eq!(pool.queued_count(), 3);

    release.send(()).unwrap();
    assert!(pool.wait_timeout(TIMEOUT));
    assert_eq!(*order.lock().unwrap(), vec![2, 1, 3]);
}

#[test]
fn random_priorities_run_in_order() {
    let pool = pool("random", 1);
    let release = blocker(&pool);
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut rng = rand::thread_rng();

    for _ in 0..50 {
        let priority: i32 = rng.gen_range(-100..100);
        let order = order.clone();
        pool.add_task(
            priority,
            Task::new("random").on_start(move |_| {
                order.lock().unwrap().push(priority);
                Ok(())
            }),
        )
        .unwrap();
    }

    drop(release);
    assert!(pool.wait_timeout(TIMEOUT));
    let order = order.lock().unwrap();
    assert_eq!(order.len(), 50);
    assert!(order.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn wait_for_all_drains_the_pool() {
    let pool = pool("drain", 2);
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..100 {
        let counter = counter.clone();
        pool.add_task(
            0,
            Task::new("noop").on_finish(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();
    }

    pool.wait_for_all();

    assert_eq!(counter.load(Ordering::SeqCst), 100);
    assert_eq!(pool.num_tasks(), 0);
    assert!(pool.executing_names().is_empty());
    assert_eq!(pool.num_threads(), 2);
}

#[test]
fn lazy_pool_does_not_start_until_first_task() {
    let pool = pool("lazy", 3);
    assert_eq!(pool.num_threads(), 3);
    assert_eq!(pool.num_threads_idle(), 3);
    assert!(pool.wait_timeout(Duration::from_millis(1)));

    let eager = Pool::new(PoolConfig::new("eager", 2).with_lazy_start(false)).unwrap();
    assert_eq!(eager.num_threads(), 2);
    eager.shutdown().unwrap();
}

#[test]
fn removed_task_never_starts() {
    let pool = pool("remove", 1);
    let release = blocker(&pool);
    let started = Arc::new(AtomicUsize::new(0));
    let count = started.clone();

    let handle = pool
        .add_task(
            3,
            Task::new("removed").on_start(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();
    assert!(pool.has_queued_task(handle));
    assert!(pool.remove_queued(handle));
    assert!(!pool.remove_queued(handle));
    assert!(!pool.has_queued_task(handle));
    assert_eq!(pool.queued_count(), 0);

    drop(release);
    assert!(pool.wait_timeout(TIMEOUT));
    assert_eq!(started.load(Ordering::SeqCst), 0);
}

#[test]
fn cancel_all_drops_queued_tasks_only() {
    let pool = pool("cancel all", 1);
    let release = blocker(&pool);
    for i in 0..5 {
        pool.add_task(i, Task::new("queued")).unwrap();
    }
    assert_eq!(pool.queued_count(), 5);
    assert_eq!(pool.executing_count(), 1);
    assert_eq!(pool.executing_names(), vec!["blocker".to_owned()]);

    pool.cancel_all();

    assert_eq!(pool.queued_count(), 0);
    assert_eq!(pool.executing_count(), 1);
    drop(release);
    assert!(pool.wait_timeout(TIMEOUT));
}

#[test]
fn higher_priority_waiting() {
    let pool = pool("urgent", 1);
    let release = blocker(&pool);
    assert!(!pool.is_higher_priority_waiting(0));

    pool.add_task(2, Task::new("queued")).unwrap();
    assert!(pool.is_higher_priority_waiting(3));
    assert!(!pool.is_higher_priority_waiting(2));
    assert!(!pool.is_higher_priority_waiting(1));

    drop(release);
    assert!(pool.wait_timeout(TIMEOUT));
}

#[derive(Debug, PartialEq)]
enum Outcome {
    Finished,
    Cancelled,
    Error(String),
}

fn watched(name: &str, outcomes: &crossbeam::channel::Sender<Outcome>) -> Task {
    let finished = outcomes.clone();
    let cancelled = outcomes.clone();
    let failed = outcomes.clone();
    Task::new(name)
        .on_finish(move |_| {
            finished.send(Outcome::Finished).unwrap();
            Ok(())
        })
        .on_cancel(move |_| cancelled.send(Outcome::Cancelled).unwrap())
        .on_error(move |_, err| failed.send(Outcome::Error(err.to_string())).unwrap())
}

fn outcomes(receiver: &Receiver<Outcome>, count: usize) -> Vec<Outcome> {
    (0..count)
        .map(|_| receiver.recv_timeout(TIMEOUT).unwrap())
        .collect()
}

#[test]
fn cancel_from_own_thread_skips_finish() {
    let pool = pool("self cancel", 1);
    let (tx, rx) = unbounded();
    let task = watched("self cancel", &tx).on_start(|thread| {
        thread.cancel();
        unreachable!("cancel unwinds");
    });
    pool.add_task(0, task).unwrap();

    assert_eq!(outcomes(&rx, 1), vec![Outcome::Cancelled]);
    assert!(pool.wait_timeout(TIMEOUT));
    assert!(rx.try_recv().is_err());
}

#[test]
fn returning_cancelled_takes_cancel_path() {
    let pool = pool("cancel result", 1);
    let (tx, rx) = unbounded();
    let task = watched("cancelled", &tx).on_start(|_| Err(Error::cancelled()));
    pool.add_task(0, task).unwrap();

    assert_eq!(outcomes(&rx, 1), vec![Outcome::Cancelled]);
}

#[test]
fn checkpoint_sees_cancel_from_another_thread() {
    let pool = pool("checkpoint", 1);
    let (tx, rx) = unbounded();
    let (context_tx, context_rx) = unbounded();
    let task = watched("looping", &tx).on_start(move |context| {
        context_tx.send(context.clone()).unwrap();
        loop {
            context.checkpoint()?;
            thread::sleep(Duration::from_millis(1));
        }
    });
    pool.add_task(0, task).unwrap();

    let context = context_rx.recv_timeout(TIMEOUT).unwrap();
    context.cancel();

    assert_eq!(outcomes(&rx, 1), vec![Outcome::Cancelled]);
    assert!(pool.wait_timeout(TIMEOUT));
}

#[test]
fn pool_cancel_reaches_running_tasks() {
    let pool = pool("cancel", 2);
    let (tx, rx) = unbounded();
    let (started_tx, started_rx) = unbounded();
    for i in 0..2 {
        let started = started_tx.clone();
        let task = watched(&format!("spin {}", i), &tx).on_start(move |context| {
            started.send(()).unwrap();
            loop {
                context.checkpoint()?;
                thread::sleep(Duration::from_millis(1));
            }
        });
        pool.add_task(0, task).unwrap();
    }
    started_rx.recv_timeout(TIMEOUT).unwrap();
    started_rx.recv_timeout(TIMEOUT).unwrap();

    pool.cancel();

    assert_eq!(outcomes(&rx, 2), vec![Outcome::Cancelled, Outcome::Cancelled]);
    assert!(pool.wait_timeout(TIMEOUT));
}

#[test]
fn panic_goes_to_on_error_and_worker_survives() {
    let pool = pool("panic", 1);
    let (tx, rx) = unbounded();
    pool.add_task(0, watched("boom", &tx).on_start(|_| panic!("boom")))
        .unwrap();
    pool.add_task(1, watched("after", &tx)).unwrap();

    let seen = outcomes(&rx, 2);
    assert_eq!(seen[0], Outcome::Error("panicked: boom".to_owned()));
    assert_eq!(seen[1], Outcome::Finished);
    assert!(pool.wait_timeout(TIMEOUT));
    assert_eq!(pool.num_threads(), 1);
}

#[test]
fn error_result_goes_to_on_error() {
    let pool = pool("error", 1);
    let (tx, rx) = unbounded();
    let (result_tx, result_rx) = unbounded();
    let task = Task::new("failing")
        .on_finish(|_| Err(Error::task("disk full")))
        .on_error(move |thread, err| {
            tx.send(err.to_string()).unwrap();
            result_tx.send(thread.result()).unwrap();
        });
    pool.add_task(0, task).unwrap();

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "disk full");
    assert_eq!(result_rx.recv_timeout(TIMEOUT).unwrap(), ThreadResult::Error);
}

#[test]
fn panic_in_error_callback_restarts_worker() {
    let pool = pool("restart", 1);
    pool.add_task(
        0,
        Task::new("double fault")
            .on_start(|_| Err(Error::task("first")))
            .on_error(|_, _| panic!("second")),
    )
    .unwrap();

    let (tx, rx) = unbounded();
    pool.add_task(1, watched("survivor", &tx)).unwrap();

    assert_eq!(outcomes(&rx, 1), vec![Outcome::Finished]);
    assert!(pool.wait_timeout(TIMEOUT));
    assert_eq!(pool.num_threads(), 1);
}

#[test]
fn exactly_one_outcome_per_task() {
    let pool = pool("outcomes", 4);
    let (tx, rx) = unbounded();
    for i in 0..60 {
        let task = match i % 3 {
            0 => watched("ok", &tx),
            1 => watched("cancel", &tx).on_start(|_| Err(Error::cancelled())),
            _ => watched("fail", &tx).on_finish(|_| Err(Error::task("nope"))),
        };
        pool.add_task(0, task).unwrap();
    }
    assert!(pool.wait_timeout(TIMEOUT));

    let seen: Vec<Outcome> = rx.try_iter().collect();
    assert_eq!(seen.len(), 60);
    let finished = seen.iter().filter(|o| **o == Outcome::Finished).count();
    let cancelled = seen.iter().filter(|o| **o == Outcome::Cancelled).count();
    assert_eq!(finished, 20);
    assert_eq!(cancelled, 20);
}

fn resubmitting(pool: &Arc<Pool>, counter: &Arc<AtomicUsize>) -> Task {
    let pool = Arc::downgrade(pool);
    let counter = counter.clone();
    Task::new("resubmit").on_finish(move |context| {
        counter.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(1));
        context.checkpoint()?;
        if let Some(pool) = pool.upgrade() {
            let next = resubmitting(&pool, &counter);
            let _ = pool.add_task(0, next);
        }
        Ok(())
    })
}

#[test]
fn shutdown_stops_self_resubmitting_tasks() {
    let pool = Arc::new(pool("shutdown", 2));
    let counter = Arc::new(AtomicUsize::new(0));
    pool.add_task(0, resubmitting(&pool, &counter)).unwrap();
    pool.add_task(0, resubmitting(&pool, &counter)).unwrap();
    while counter.load(Ordering::SeqCst) < 10 {
        thread::sleep(Duration::from_millis(1));
    }

    pool.shutdown().unwrap();
    pool.shutdown().unwrap();

    assert_eq!(pool.num_threads(), 0);
    assert_eq!(pool.queued_count(), 0);
    let err = pool.add_task(0, Task::new("late")).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ShutDown(_)));
}

#[test]
fn shutdown_from_worker_is_refused() {
    let pool = Arc::new(pool("worker shutdown", 1));
    let (tx, rx) = unbounded();
    let weak = Arc::downgrade(&pool);
    pool.add_task(
        0,
        Task::new("shutdown").on_start(move |_| {
            if let Some(pool) = weak.upgrade() {
                tx.send(pool.shutdown().map_err(|e| e.to_string())).unwrap();
            }
            Ok(())
        }),
    )
    .unwrap();

    let result = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(result.unwrap_err().contains("wrong system thread"));
    assert!(pool.wait_timeout(TIMEOUT));
}

#[test]
fn duplicate_ids_are_rejected() {
    let pool = pool("duplicate", 1);
    let release = blocker(&pool);
    let id = pool.next_task_id();

    pool.add_task(0, Task::new("first").with_id(id)).unwrap();
    let err = pool
        .add_task(1, Task::new("second").with_id(id))
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::DuplicateTask(d) if *d == id));
    assert_eq!(pool.queued_count(), 1);

    drop(release);
    assert!(pool.wait_timeout(TIMEOUT));
}

#[test]
fn resize_grows_and_shrinks() {
    let pool = pool("resize", 2);
    assert_eq!(pool.resize(4).unwrap(), 4);
    assert_eq!(pool.num_threads(), 4);

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..20 {
        let counter = counter.clone();
        pool.add_task(
            0,
            Task::new("count").on_start(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();
    }
    assert!(pool.wait_timeout(TIMEOUT));
    assert_eq!(counter.load(Ordering::SeqCst), 20);

    assert_eq!(pool.resize(1).unwrap(), 1);
    assert_eq!(pool.num_threads(), 1);
    pool.add_task(0, Task::new("after shrink")).unwrap();
    assert!(pool.wait_timeout(TIMEOUT));

    assert!(matches!(
        pool.resize(0).unwrap_err().kind(),
        ErrorKind::Config(_)
    ));
}

#[test]
fn wait_timeout_gives_up() {
    let pool = pool("timeout", 1);
    let release = blocker(&pool);

    assert!(!pool.wait_timeout(Duration::from_millis(20)));

    drop(release);
    assert!(pool.wait_timeout(TIMEOUT));
}

#[test]
fn zero_size_is_a_config_error() {
    let err = Pool::new(PoolConfig::new("empty", 0)).err().unwrap();
    assert!(matches!(err.kind(), ErrorKind::Config(_)));
}

#[test]
fn file_log_records_events() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pool.log");
    let pool = pool("logged", 1);
    pool.set_log(Some(Arc::new(FileLog::new(&path).unwrap())));
    assert!(pool.log().is_some());

    pool.add_task(0, Task::new("logged")).unwrap();
    assert!(pool.wait_timeout(TIMEOUT));
    pool.shutdown().unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("pool: logged"));
    assert!(content.contains("threads started"));
    assert!(content.lines().all(|line| line.starts_with("system thread: ")));
}

#[test]
fn sleep_duration_is_adjustable() {
    let pool = pool("sleepy", 1);
    assert_eq!(pool.sleep_duration(), Duration::from_millis(1));
    pool.set_sleep_duration(Duration::from_millis(5));
    assert_eq!(pool.sleep_duration(), Duration::from_millis(5));
    assert_eq!(pool.name(), "sleepy");
}
