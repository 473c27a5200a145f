//! serializes control plane work against the data plane.
//!
//! The pipeline runs on one thread.  Other threads post tasks through a
//! channel; the owner drains them at the top of every tick, so a mutation
//! never interleaves with packet or frame processing.  schedule_and_wait is
//! a post plus a blocking wait on the reply channel.
use std::sync::mpsc;

use crate::common::status::Status;

struct Envelope<T, R> {
    task: T,
    reply: Option<mpsc::Sender<R>>,
}

/// the handle other threads keep; clone freely
pub struct TaskSender<T, R> {
    tx: mpsc::Sender<Envelope<T, R>>,
}

impl<T, R> Clone for TaskSender<T, R> {
    fn clone(&self) -> TaskSender<T, R> {
        TaskSender {
            tx: self.tx.clone(),
        }
    }
}

impl<T, R> TaskSender<T, R> {
    /// fire and forget; the result is dropped
    pub fn post(&self, task: T) -> Result<(), Status> {
        self.tx
            .send(Envelope {
                task: task,
                reply: None,
            })
            .map_err(|_| Status::NotFound)
    }
    /// post and block until the loop has executed the task
    pub fn schedule_and_wait(&self, task: T) -> Result<R, Status> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(Envelope {
                task: task,
                reply: Some(reply_tx),
            })
            .map_err(|_| Status::NotFound)?;
        reply_rx.recv().map_err(|_| Status::Unknown)
    }
}

/// the loop-owned end
pub struct TaskReceiver<T, R> {
    rx: mpsc::Receiver<Envelope<T, R>>,
}

impl<T, R> TaskReceiver<T, R> {
    /// drain every pending task in posting order.
    ///
    /// Runs on the pipeline thread, so whatever execute mutates is safe
    /// from the data plane by construction.
    pub fn process<F: FnMut(T) -> R>(&mut self, mut execute: F) -> usize {
        let mut count = 0;
        while let Ok(envelope) = self.rx.try_recv() {
            let result = execute(envelope.task);
            if let Some(reply) = envelope.reply {
                // a dropped waiter is fine, the work still happened
                let _ = reply.send(result);
            }
            count += 1;
        }
        count
    }
}

/// make a connected task channel pair
pub fn task_channel<T, R>() -> (TaskSender<T, R>, TaskReceiver<T, R>) {
    let (tx, rx) = mpsc::channel();
    (TaskSender { tx: tx }, TaskReceiver { rx: rx })
}
