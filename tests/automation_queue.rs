use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use macos_mcp_operator::automation::{AutomationError, AutomationQueue, STOP_ALL_MESSAGE};
use macos_mcp_operator::types::{ActionReceipt, ActionStatus};
use parking_lot::Mutex;

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn actions_run_in_submission_order_one_at_a_time() {
    let queue = AutomationQueue::new();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let order = Arc::new(Mutex::new(Vec::new()));

    let submissions = (0..5).map(|index| {
        let active = active.clone();
        let peak = peak.clone();
        let order = order.clone();
        queue.enqueue(format!("step-{index}"), move |_| async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            order.lock().push(index);
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(ActionReceipt::executed(format!("done {index}")))
        })
    });

    let receipts = join_all(submissions).await;

    assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    for (index, receipt) in receipts.into_iter().enumerate() {
        let receipt = receipt.expect("receipt");
        assert_eq!(receipt.status, ActionStatus::Executed);
        assert_eq!(receipt.message, format!("done {index}"));
    }
    assert!(!queue.is_busy());
    assert_eq!(queue.pending_len(), 0);
}

#[tokio::test]
async fn stop_all_cancels_waiting_and_running_actions() {
    let queue = AutomationQueue::new();
    let later_ran = Arc::new(AtomicBool::new(false));

    let submitter = queue.clone();
    let flag = later_ran.clone();
    let outcomes = tokio::spawn(async move {
        let hold = submitter.enqueue("hold", |cancel| async move {
            cancel.cancelled().await;
            Err(AutomationError::Cancelled)
        });
        let waiting = (0..2).map(|_| {
            let flag = flag.clone();
            submitter.enqueue("later", move |_| async move {
                flag.store(true, Ordering::SeqCst);
                Ok(ActionReceipt::executed("ran"))
            })
        });
        let (hold, waiting) = tokio::join!(hold, join_all(waiting));
        (hold, waiting)
    });

    wait_until(|| queue.is_busy() && queue.pending_len() == 2).await;
    assert_eq!(queue.stop_all(), 3);

    let (hold, waiting) = outcomes.await.expect("join");
    let hold = hold.expect("hold receipt");
    assert_eq!(hold.status, ActionStatus::Cancelled);
    assert_eq!(hold.message, "Action hold was cancelled");

    for receipt in waiting {
        let receipt = receipt.expect("waiting receipt");
        assert_eq!(receipt.status, ActionStatus::Cancelled);
        assert_eq!(receipt.message, STOP_ALL_MESSAGE);
        assert!(!receipt.action_id.is_empty());
    }
    assert!(!later_ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn stop_all_on_idle_queue_is_a_no_op() {
    let queue = AutomationQueue::new();
    assert_eq!(queue.stop_all(), 0);

    let receipt = queue
        .enqueue("after-stop", |_| async { Ok(ActionReceipt::executed("fine")) })
        .await
        .expect("receipt");
    assert_eq!(receipt.message, "fine");
}

#[tokio::test]
async fn panicking_action_fails_without_wedging_the_queue() {
    let queue = AutomationQueue::new();

    let failed = queue
        .enqueue("explode", |_| async {
            if true {
                panic!("adapter blew up");
            }
            Ok(ActionReceipt::executed("unreachable"))
        })
        .await;
    match failed {
        Err(AutomationError::Failed(message)) => {
            assert!(message.starts_with("action explode aborted"), "{message}")
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let next = queue
        .enqueue("next", |_| async { Ok(ActionReceipt::executed("still alive")) })
        .await
        .expect("receipt");
    assert_eq!(next.message, "still alive");
}
