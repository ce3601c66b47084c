// crates/storyreel-media/src/worker.rs
//
// PipelineWorker: runs assemble / remix jobs on their own threads and
// reports over one result channel. This is the non-blocking face of the
// crate for a UI or an orchestration loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, atomic::{AtomicBool, Ordering}};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::debug;
use uuid::Uuid;

use storyreel_core::media_types::{JobKind, PipelineResult};
use storyreel_core::PipelineError;

use crate::encode::{assemble, AssembleSpec};
use crate::remix::{remix, RemixSpec};

type CancelMap = Arc<Mutex<HashMap<Uuid, Arc<AtomicBool>>>>;

pub struct PipelineWorker {
    /// Progress and terminal results for every job started on this worker.
    pub rx:   Receiver<PipelineResult>,
    tx:       Sender<PipelineResult>,
    shutdown: Arc<AtomicBool>,
    /// Per-job cancel flags, inserted before the job thread starts and
    /// removed when it ends.
    cancels:  CancelMap,
}

impl Default for PipelineWorker {
    fn default() -> Self { Self::new() }
}

impl PipelineWorker {
    pub fn new() -> Self {
        let (tx, rx) = bounded(512);
        Self {
            rx,
            tx,
            shutdown: Arc::new(AtomicBool::new(false)),
            cancels:  Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn a thread assembling `spec`. Returns the job id used in results.
    pub fn start_assemble(&self, spec: AssembleSpec) -> Uuid {
        self.spawn(JobKind::Assemble, move |job_id, cancel, tx| {
            let result = assemble(&spec, cancel, |progress| {
                // Progress is advisory; never block the encode on a full channel.
                let _ = tx.try_send(PipelineResult::Progress { job_id, kind: JobKind::Assemble, progress });
            });
            result.map(|report| PipelineResult::AssembleDone { job_id, report })
        })
    }

    /// Spawn a thread remixing `spec`. Returns the job id used in results.
    pub fn start_remix(&self, spec: RemixSpec) -> Uuid {
        self.spawn(JobKind::Remix, move |job_id, cancel, tx| {
            let result = remix(&spec, cancel, |progress| {
                let _ = tx.try_send(PipelineResult::Progress { job_id, kind: JobKind::Remix, progress });
            });
            result.map(|report| PipelineResult::RemixDone { job_id, report })
        })
    }

    /// Ask job `job_id` to stop. It finishes the current frame, deletes its
    /// staged output and reports `Cancelled`. Unknown or finished ids are
    /// ignored.
    pub fn cancel(&self, job_id: Uuid) {
        if let Some(flag) = self.flags().get(&job_id) {
            flag.store(true, Ordering::Relaxed);
        }
    }

    /// Cancel every running job and refuse new ones.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for flag in self.flags().values() {
            flag.store(true, Ordering::Relaxed);
        }
    }

    /// Jobs started and not yet finished.
    pub fn active_jobs(&self) -> usize {
        self.flags().len()
    }

    fn flags(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<AtomicBool>>> {
        self.cancels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn<F>(&self, kind: JobKind, job: F) -> Uuid
    where
        F: FnOnce(Uuid, &AtomicBool, &Sender<PipelineResult>) -> Result<PipelineResult, PipelineError>
            + Send
            + 'static,
    {
        let job_id = Uuid::new_v4();
        let cancel = Arc::new(AtomicBool::new(false));
        let tx     = self.tx.clone();
        let sd     = Arc::clone(&self.shutdown);

        // Register before spawning so an immediate cancel() finds the flag.
        self.flags().insert(job_id, Arc::clone(&cancel));

        let cancels = Arc::clone(&self.cancels);
        thread::spawn(move || {
            let outcome = if sd.load(Ordering::Relaxed) {
                Err(PipelineError::Cancelled)
            } else {
                debug!("{kind:?} job {job_id} started");
                job(job_id, &cancel, &tx)
            };

            let msg = match outcome {
                Ok(done)                        => done,
                Err(PipelineError::Cancelled)   => PipelineResult::Cancelled { job_id, kind },
                Err(error)                      => PipelineResult::Failed { job_id, kind, error },
            };
            debug!("{kind:?} job {job_id} finished");

            // Drop the flag before reporting so a caller that saw the terminal
            // result also sees active_jobs() go down.
            cancels.lock().unwrap_or_else(PoisonError::into_inner).remove(&job_id);
            let _ = tx.send(msg);
        });
        job_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use storyreel_core::config::RenderSettings;
    use storyreel_core::{MusicTrack, Timeline};

    const WAIT: Duration = Duration::from_secs(30);

    fn terminal(worker: &PipelineWorker, id: Uuid) -> PipelineResult {
        loop {
            let msg = worker.rx.recv_timeout(WAIT).expect("job result");
            assert_eq!(msg.job_id(), id);
            if msg.is_terminal() {
                return msg;
            }
        }
    }

    fn empty_assemble(out: &Path) -> AssembleSpec {
        AssembleSpec {
            timeline: Timeline::default(),
            settings: RenderSettings::new(30, 64, 64),
            output:   out.to_path_buf(),
        }
    }

    #[test]
    fn failed_assemble_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let worker = PipelineWorker::new();
        let id = worker.start_assemble(empty_assemble(&dir.path().join("out.mp4")));
        match terminal(&worker, id) {
            PipelineResult::Failed { kind, error, .. } => {
                assert_eq!(kind, JobKind::Assemble);
                assert_eq!(error, PipelineError::EmptyTimeline);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(worker.active_jobs(), 0);
    }

    #[test]
    fn failed_remix_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let worker = PipelineWorker::new();
        let spec = RemixSpec::new(
            dir.path().join("missing.mp4"),
            MusicTrack::new(dir.path().join("missing.mp3"), 0.3),
            30,
            dir.path().join("out.mp4"),
        );
        let id = worker.start_remix(spec);
        match terminal(&worker, id) {
            PipelineResult::Failed { kind, error: PipelineError::AssetUnavailable { scene_index, .. }, .. } => {
                assert_eq!(kind, JobKind::Remix);
                assert_eq!(scene_index, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn jobs_after_shutdown_are_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let worker = PipelineWorker::new();
        worker.shutdown();
        let id = worker.start_assemble(empty_assemble(&dir.path().join("out.mp4")));
        assert!(matches!(
            terminal(&worker, id),
            PipelineResult::Cancelled { kind: JobKind::Assemble, .. }
        ));
    }

    #[test]
    fn job_ids_are_distinct_and_cancel_unknown_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let worker = PipelineWorker::new();
        worker.cancel(Uuid::new_v4());
        let a = worker.start_assemble(empty_assemble(&dir.path().join("a.mp4")));
        let b = worker.start_assemble(empty_assemble(&dir.path().join("b.mp4")));
        assert_ne!(a, b);

        let mut seen = Vec::new();
        while seen.len() < 2 {
            let msg = worker.rx.recv_timeout(WAIT).expect("job result");
            if msg.is_terminal() {
                seen.push(msg.job_id());
            }
        }
        seen.sort();
        let mut want = vec![a, b];
        want.sort();
        assert_eq!(seen, want);
    }
}
