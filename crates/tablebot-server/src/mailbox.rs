use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tablebot_contracts::Actor;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};

type Handler<T> = Arc<dyn Fn(T) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// One queue and one worker task per active actor. Work for an actor runs
/// in arrival order; different actors run concurrently. Workers retire
/// after `idle` without work.
pub struct Mailboxes<T> {
    senders: Arc<Mutex<HashMap<Actor, mpsc::UnboundedSender<T>>>>,
    handler: Handler<T>,
    idle: Duration,
}

impl<T: Send + 'static> Mailboxes<T> {
    pub fn new<F, Fut>(idle: Duration, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            senders: Arc::new(Mutex::new(HashMap::new())),
            handler: Arc::new(
                move |item| -> Pin<Box<dyn Future<Output = ()> + Send>> { Box::pin(handler(item)) },
            ),
            idle,
        }
    }

    pub async fn enqueue(&self, actor: Actor, item: T) {
        let mut senders = self.senders.lock().await;
        let item = match senders.get(&actor) {
            Some(tx) => match tx.send(item) {
                Ok(()) => return,
                Err(mpsc::error::SendError(item)) => item,
            },
            None => item,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive until the worker below starts, so this
        // send cannot fail.
        let _ = tx.send(item);
        senders.insert(actor.clone(), tx.clone());
        debug!(actor = %actor, "mailbox opened");
        tokio::spawn(run_worker(
            actor,
            rx,
            tx,
            self.senders.clone(),
            self.handler.clone(),
            self.idle,
        ));
    }

    pub async fn active(&self) -> usize {
        self.senders.lock().await.len()
    }
}

async fn run_worker<T: Send + 'static>(
    actor: Actor,
    mut rx: mpsc::UnboundedReceiver<T>,
    own: mpsc::UnboundedSender<T>,
    senders: Arc<Mutex<HashMap<Actor, mpsc::UnboundedSender<T>>>>,
    handler: Handler<T>,
    idle: Duration,
) {
    loop {
        let item = match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(_) => {
                let mut map = senders.lock().await;
                match rx.try_recv() {
                    Ok(item) => {
                        drop(map);
                        item
                    }
                    Err(_) => {
                        if map.get(&actor).is_some_and(|tx| tx.same_channel(&own)) {
                            map.remove(&actor);
                        }
                        debug!(actor = %actor, "mailbox retired");
                        break;
                    }
                }
            }
        };

        if let Err(err) = tokio::spawn((handler)(item)).await {
            error!(actor = %actor, error = %err, "actor task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn work_for_one_actor_runs_in_arrival_order() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let boxes = Mailboxes::new(Duration::from_secs(5), move |n: u64| {
            let sink = sink.clone();
            async move {
                tokio::time::sleep(Duration::from_millis((10 - n % 10) * 2)).await;
                sink.lock().unwrap().push(n);
            }
        });
        for n in 0..20 {
            boxes.enqueue(Actor::user("U1"), n).await;
        }
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn idle_mailboxes_retire_and_reopen() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let boxes = Mailboxes::new(Duration::from_millis(30), move |_: ()| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        boxes.enqueue(Actor::user("U1"), ()).await;
        boxes.enqueue(Actor::group("C1"), ()).await;
        assert_eq!(boxes.active().await, 2);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(boxes.active().await, 0);

        boxes.enqueue(Actor::user("U1"), ()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn panicking_work_does_not_stop_the_mailbox() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let boxes = Mailboxes::new(Duration::from_secs(5), move |fail: bool| {
            let counter = counter.clone();
            async move {
                if fail {
                    panic!("boom");
                }
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        boxes.enqueue(Actor::user("U1"), true).await;
        boxes.enqueue(Actor::user("U1"), false).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
