//! Execution units: OS threads that run one analysis at a time.
//!
//! A unit receives commands over its own channel and reports back to the pool
//! through a shared event channel. When the thread ends for any reason,
//! including a panic inside the analyzer, an `Exited` event is sent so the
//! pool can respawn it.

use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::analyzer::{AnalysisResult, Analyzer};

/// Work sent to a unit.
#[derive(Debug)]
pub(crate) enum UnitCommand {
    Analyze { task_id: Uuid, content: String },
}

/// Messages from units back to the pool.
#[derive(Debug)]
pub(crate) enum UnitEvent {
    /// A task finished, successfully or with a task-level error.
    Completed {
        index: usize,
        generation: u64,
        task_id: Uuid,
        outcome: Result<AnalysisResult, String>,
    },
    /// The unit's thread ended.
    Exited { index: usize, generation: u64 },
}

/// Pool-side handle to a running unit.
pub(crate) struct Unit {
    pub index: usize,
    pub generation: u64,
    pub commands: std_mpsc::Sender<UnitCommand>,
    /// Task currently bound to this unit.
    pub busy: Option<Uuid>,
    _thread: thread::JoinHandle<()>,
}

impl Unit {
    pub fn is_idle(&self) -> bool {
        self.busy.is_none()
    }
}

/// Sends `Exited` when dropped, which also happens while unwinding a panic.
struct ExitNotice {
    index: usize,
    generation: u64,
    events: mpsc::UnboundedSender<UnitEvent>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let _ = self.events.send(UnitEvent::Exited {
            index: self.index,
            generation: self.generation,
        });
    }
}

/// Spawn a unit thread at `index`.
pub(crate) fn spawn_unit(
    index: usize,
    generation: u64,
    analyzer: Arc<dyn Analyzer>,
    events: mpsc::UnboundedSender<UnitEvent>,
) -> std::io::Result<Unit> {
    let (commands, inbox) = std_mpsc::channel();
    let thread = thread::Builder::new()
        .name(format!("analysis-worker-{index}"))
        .spawn(move || run_unit(index, generation, analyzer, inbox, events))?;

    Ok(Unit {
        index,
        generation,
        commands,
        busy: None,
        _thread: thread,
    })
}

fn run_unit(
    index: usize,
    generation: u64,
    analyzer: Arc<dyn Analyzer>,
    inbox: std_mpsc::Receiver<UnitCommand>,
    events: mpsc::UnboundedSender<UnitEvent>,
) {
    let _notice = ExitNotice {
        index,
        generation,
        events: events.clone(),
    };

    // Ends when the pool drops the command sender.
    while let Ok(command) = inbox.recv() {
        match command {
            UnitCommand::Analyze { task_id, content } => {
                let outcome = analyzer.analyze(&content).map_err(|e| e.to_string());
                let event = UnitEvent::Completed {
                    index,
                    generation,
                    task_id,
                    outcome,
                };
                if events.send(event).is_err() {
                    break;
                }
            }
        }
    }
}
