//! A small Elm-style event loop.
//!
//! `App::update` runs on the calling thread, so dialogs stay on the UI
//! thread. Background work runs on a tokio runtime and reports back through
//! a crossbeam channel as [`Message`]s.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use crossbeam_channel::Sender;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use log::{debug, error, info};

use crate::app::App;
use crate::message::{Message, WorkerKind};

type Job = Box<dyn FnOnce(Emitter) -> BoxFuture<'static, Message> + Send>;

enum Event {
    Emitted(Message),
    Finished(Message),
}

/// Lets a running job push intermediate messages to the UI thread.
#[derive(Clone)]
pub struct Emitter {
    sender: Sender<Event>,
}

impl Emitter {
    pub fn emit(&self, message: Message) {
        if self.sender.send(Event::Emitted(message)).is_err() {
            debug!("UI loop has stopped; dropping message");
        }
    }
}

/// Work requested by `App::update`.
pub enum Task {
    None,
    Done(Message),
    Spawn { kind: WorkerKind, job: Job },
    Batch(Vec<Task>),
    Exit { code: u8, grace: Duration },
}

impl Task {
    pub fn none() -> Self {
        Self::None
    }

    pub fn done(message: Message) -> Self {
        Self::Done(message)
    }

    /// Run `future` in the background and map its output to a message.
    ///
    /// `kind` names the job in the `WorkerFailed` message sent if it panics.
    pub fn perform<T, F, M>(kind: WorkerKind, future: F, map: M) -> Self
    where
        F: Future<Output = T> + Send + 'static,
        M: FnOnce(T) -> Message + Send + 'static,
    {
        Self::Spawn {
            kind,
            job: Box::new(move |_| async move { map(future.await) }.boxed()),
        }
    }

    /// Like [`Task::perform`], for jobs that also report progress.
    pub fn run<F, Fut>(kind: WorkerKind, job: F) -> Self
    where
        F: FnOnce(Emitter) -> Fut + Send + 'static,
        Fut: Future<Output = Message> + Send + 'static,
    {
        Self::Spawn {
            kind,
            job: Box::new(move |emitter| job(emitter).boxed()),
        }
    }

    pub fn batch(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self::Batch(tasks.into_iter().collect())
    }

    /// Stop the loop and exit the process after `grace`.
    pub fn exit(code: u8, grace: Duration) -> Self {
        Self::Exit { code, grace }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "Task::None"),
            Self::Done(message) => f.debug_tuple("Task::Done").field(message).finish(),
            Self::Spawn { kind, .. } => write!(f, "Task::Spawn({kind:?})"),
            Self::Batch(tasks) => f.debug_tuple("Task::Batch").field(tasks).finish(),
            Self::Exit { code, grace } => f
                .debug_struct("Task::Exit")
                .field("code", code)
                .field("grace", grace)
                .finish(),
        }
    }
}

/// Drive `app` until it asks to exit or runs out of work.
///
/// Returns the process exit code.
pub fn run(mut app: App, initial: Message) -> std::io::Result<u8> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let (sender, receiver) = crossbeam_channel::unbounded();
    let mut pending = VecDeque::from([initial]);
    let mut in_flight = 0usize;
    let mut last_status = String::new();

    loop {
        let message = if let Some(message) = pending.pop_front() {
            message
        } else if in_flight == 0 {
            break;
        } else {
            match receiver.recv() {
                Ok(Event::Emitted(message)) => message,
                Ok(Event::Finished(message)) => {
                    in_flight -= 1;
                    message
                }
                Err(_) => break,
            }
        };

        let task = app.update(message);

        if app.status() != last_status {
            last_status = app.status().to_string();
            eprintln!("{last_status}");
        }

        if let Some((code, grace)) =
            schedule(task, &runtime, &sender, &mut pending, &mut in_flight)
        {
            info!("Exiting with code {code} after {}ms", grace.as_millis());
            std::thread::sleep(grace);
            runtime.shutdown_background();
            return Ok(code);
        }
    }

    debug!("No work left; leaving event loop");
    runtime.shutdown_background();
    Ok(0)
}

fn schedule(
    task: Task,
    runtime: &tokio::runtime::Runtime,
    sender: &Sender<Event>,
    pending: &mut VecDeque<Message>,
    in_flight: &mut usize,
) -> Option<(u8, Duration)> {
    match task {
        Task::None => None,
        Task::Done(message) => {
            pending.push_back(message);
            None
        }
        Task::Spawn { kind, job } => {
            *in_flight += 1;
            let handle = runtime.spawn(job(Emitter {
                sender: sender.clone(),
            }));
            let sender = sender.clone();
            runtime.spawn(async move {
                let message = match handle.await {
                    Ok(message) => message,
                    Err(join_error) => {
                        error!("Background task {kind:?} failed: {join_error}");
                        Message::WorkerFailed {
                            kind,
                            reason: join_error.to_string(),
                        }
                    }
                };
                let _ = sender.send(Event::Finished(message));
            });
            None
        }
        Task::Batch(tasks) => {
            let mut exit = None;
            for task in tasks {
                if let Some(requested) = schedule(task, runtime, sender, pending, in_flight) {
                    exit.get_or_insert(requested);
                }
            }
            exit
        }
        Task::Exit { code, grace } => Some((code, grace)),
    }
}

#[cfg(test)]
impl Task {
    /// Messages this task would queue immediately.
    pub fn queued_messages(&self) -> Vec<&Message> {
        match self {
            Self::Done(message) => vec![message],
            Self::Batch(tasks) => tasks.iter().flat_map(Self::queued_messages).collect(),
            _ => Vec::new(),
        }
    }

    pub fn spawned_jobs(&self) -> usize {
        match self {
            Self::Spawn { .. } => 1,
            Self::Batch(tasks) => tasks.iter().map(Self::spawned_jobs).sum(),
            _ => 0,
        }
    }

    pub fn spawned_kinds(&self) -> Vec<WorkerKind> {
        match self {
            Self::Spawn { kind, .. } => vec![*kind],
            Self::Batch(tasks) => tasks.iter().flat_map(Self::spawned_kinds).collect(),
            _ => Vec::new(),
        }
    }

    pub fn exit_code(&self) -> Option<u8> {
        match self {
            Self::Exit { code, .. } => Some(*code),
            Self::Batch(tasks) => tasks.iter().find_map(Self::exit_code),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Run every spawned job to completion, returning emitted messages
    /// followed by each job's final message.
    pub async fn resolve(self) -> Vec<Message> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let mut finals = Vec::new();
        for job in self.into_jobs() {
            finals.push(
                job(Emitter {
                    sender: sender.clone(),
                })
                .await,
            );
        }
        drop(sender);

        let mut messages: Vec<Message> = receiver
            .into_iter()
            .map(|event| match event {
                Event::Emitted(message) | Event::Finished(message) => message,
            })
            .collect();
        messages.extend(finals);
        messages
    }

    fn into_jobs(self) -> Vec<Job> {
        match self {
            Self::Spawn { job, .. } => vec![job],
            Self::Batch(tasks) => tasks.into_iter().flat_map(Self::into_jobs).collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Task;
    use crate::message::{Message, WorkerKind};

    #[test]
    fn batch_collects_queued_messages_and_exit() {
        let task = Task::batch([
            Task::done(Message::CheckForUpdates),
            Task::none(),
            Task::batch([Task::done(Message::OpenImage(None))]),
            Task::exit(0, Duration::from_millis(1)),
        ]);

        let queued = task.queued_messages();
        assert_eq!(queued.len(), 2);
        assert!(matches!(queued[0], Message::CheckForUpdates));
        assert!(matches!(queued[1], Message::OpenImage(None)));
        assert_eq!(task.exit_code(), Some(0));
    }

    #[tokio::test]
    async fn resolve_returns_emitted_messages_before_final_one() {
        let task = Task::run(WorkerKind::AppUpdate, |emitter| async move {
            emitter.emit(Message::AppUpdateProgress {
                downloaded: 1,
                total: 2,
            });
            Message::AppUpdateHandingOff
        });
        assert_eq!(task.spawned_kinds(), vec![WorkerKind::AppUpdate]);

        let messages = task.resolve().await;

        assert_eq!(messages.len(), 2);
        assert!(matches!(
            messages[0],
            Message::AppUpdateProgress {
                downloaded: 1,
                total: 2
            }
        ));
        assert!(matches!(messages[1], Message::AppUpdateHandingOff));
    }

    #[tokio::test]
    async fn perform_maps_future_output() {
        let task = Task::perform(WorkerKind::ImageSave, async { 7 }, |value| {
            Message::AppUpdateProgress {
                downloaded: value,
                total: 10,
            }
        });

        let messages = task.resolve().await;

        assert!(matches!(
            &messages[..],
            [Message::AppUpdateProgress {
                downloaded: 7,
                total: 10
            }]
        ));
    }
}
