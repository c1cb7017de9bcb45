//! Observer pattern for optimization monitoring.
//!
//! Observers are registered with the optimizer and notified after every
//! Gauss-Newton update with a read-only view of the graph. This keeps plotting,
//! animation and metrics collection out of the optimization loop.
//!
//! ```text
//! ┌─────────────────┐
//! │   GaussNewton   │
//! └────────┬────────┘
//!          │ observers.notify(graph, iteration)
//!          ├──────────────────┬──────────────────┐
//!          ▼                  ▼                  ▼
//!   ┌────────────┐     ┌────────────┐     ┌────────────┐
//!   │ Trajectory │     │  Metrics   │     │   Custom   │
//!   │  Recorder  │     │  Observer  │     │  Observer  │
//!   └────────────┘     └────────────┘     └────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use pose_graph_slam::observers::{OptObserver, TrajectoryRecorder};
//! use pose_graph_slam::optimizer::GaussNewton;
//!
//! let recorder = TrajectoryRecorder::new();
//! let mut solver = GaussNewton::new();
//! // The recorder is a cheap handle; keep one to read the frames afterwards
//! solver.add_observer(recorder.clone());
//! ```

use crate::core::Graph;
use nalgebra::{Vector2, Vector3};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::error;

/// Observer-specific error types
#[derive(Debug, Clone, Error)]
pub enum ObserverError {
    /// Shared observer state was poisoned by a panicking thread
    #[error("Mutex poisoned in {context}: {reason}")]
    MutexPoisoned { context: String, reason: String },
}

impl ObserverError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with its source
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for observer operations
pub type ObserverResult<T> = Result<T, ObserverError>;

/// Observer notified after every optimizer update
///
/// Observers only get shared access to the graph and must not assume anything
/// about the order in which several observers are called.
pub trait OptObserver: Send {
    /// Called after the update of `iteration` has been applied to `graph`
    fn on_step(&self, graph: &Graph, iteration: usize);

    /// Called right before [`OptObserver::on_step`] with the metrics of the same iteration
    fn set_iteration_metrics(&self, _cost: f64, _step_norm: f64) {}
}

/// Collection of observers, notified in registration order
#[derive(Default)]
pub struct OptObserverVec {
    observers: Vec<Box<dyn OptObserver>>,
}

impl OptObserverVec {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    pub fn add(&mut self, observer: impl OptObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    #[inline]
    pub fn set_iteration_metrics(&self, cost: f64, step_norm: f64) {
        for observer in &self.observers {
            observer.set_iteration_metrics(cost, step_norm);
        }
    }

    #[inline]
    pub fn notify(&self, graph: &Graph, iteration: usize) {
        for observer in &self.observers {
            observer.on_step(graph, iteration);
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.observers.len()
    }
}

/// Snapshot of the estimate after one iteration
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryFrame {
    /// `None` for the initial estimate
    pub iteration: Option<usize>,
    /// Global cost after the update, if reported
    pub cost: Option<f64>,
    /// Norm of the applied update, if reported
    pub step_norm: Option<f64>,
    pub poses: Vec<(usize, Vector3<f64>)>,
    pub landmarks: Vec<(usize, Vector2<f64>)>,
}

#[derive(Debug, Default)]
struct RecorderState {
    pending_metrics: Option<(f64, f64)>,
    frames: Vec<TrajectoryFrame>,
}

/// Records the pose and landmark estimates of every iteration.
///
/// Cloning yields another handle to the same recording, so one clone can be
/// handed to the optimizer while the caller keeps the other.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryRecorder {
    state: Arc<Mutex<RecorderState>>,
}

impl TrajectoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the current estimate as the initial frame
    pub fn record_initial(&self, graph: &Graph) -> ObserverResult<()> {
        let mut state = self.lock("TrajectoryRecorder::record_initial")?;
        state.frames.push(TrajectoryFrame {
            iteration: None,
            cost: graph.global_cost().ok(),
            step_norm: None,
            poses: graph.poses(),
            landmarks: graph.landmarks(),
        });
        Ok(())
    }

    /// All frames recorded so far
    pub fn frames(&self) -> ObserverResult<Vec<TrajectoryFrame>> {
        Ok(self.lock("TrajectoryRecorder::frames")?.frames.clone())
    }

    pub fn len(&self) -> usize {
        self.lock("TrajectoryRecorder::len")
            .map_or(0, |state| state.frames.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self, context: &str) -> ObserverResult<std::sync::MutexGuard<'_, RecorderState>> {
        self.state.lock().map_err(|e| {
            ObserverError::MutexPoisoned {
                context: context.to_string(),
                reason: e.to_string(),
            }
            .log()
        })
    }
}

impl OptObserver for TrajectoryRecorder {
    fn on_step(&self, graph: &Graph, iteration: usize) {
        if let Ok(mut state) = self.lock("TrajectoryRecorder::on_step") {
            let metrics = state.pending_metrics.take();
            state.frames.push(TrajectoryFrame {
                iteration: Some(iteration),
                cost: metrics.map(|(cost, _)| cost),
                step_norm: metrics.map(|(_, step_norm)| step_norm),
                poses: graph.poses(),
                landmarks: graph.landmarks(),
            });
        }
    }

    fn set_iteration_metrics(&self, cost: f64, step_norm: f64) {
        if let Ok(mut state) = self.lock("TrajectoryRecorder::set_iteration_metrics") {
            state.pending_metrics = Some((cost, step_norm));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Edge, Vertex};
    use nalgebra::{Matrix2, Vector2};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[derive(Clone)]
    struct TestObserver {
        calls: Arc<Mutex<Vec<usize>>>,
    }

    impl OptObserver for TestObserver {
        fn on_step(&self, _graph: &Graph, iteration: usize) {
            if let Ok(mut guard) = self.calls.lock() {
                guard.push(iteration);
            }
        }
    }

    fn tiny_graph() -> Result<Graph, crate::core::CoreError> {
        Graph::load(
            vec![Vertex::pose(0, 0.0, 0.0, 0.0), Vertex::landmark(1, 1.0, 2.0)],
            vec![Edge::pose_landmark(0, 1, Vector2::new(1.0, 2.0), Matrix2::identity())],
        )
    }

    #[test]
    fn test_empty_observers() -> TestResult {
        let observers = OptObserverVec::new();
        assert!(observers.is_empty());
        assert_eq!(observers.len(), 0);

        // Should not panic with no observers
        observers.notify(&tiny_graph()?, 0);
        Ok(())
    }

    #[test]
    fn test_multiple_observers() -> TestResult {
        let calls1 = Arc::new(Mutex::new(Vec::new()));
        let calls2 = Arc::new(Mutex::new(Vec::new()));

        let mut observers = OptObserverVec::new();
        observers.add(TestObserver {
            calls: calls1.clone(),
        });
        observers.add(TestObserver {
            calls: calls2.clone(),
        });
        assert_eq!(observers.len(), 2);

        let graph = tiny_graph()?;
        observers.notify(&graph, 5);
        observers.notify(&graph, 6);

        assert_eq!(*calls1.lock().map_err(|e| e.to_string())?, vec![5, 6]);
        assert_eq!(*calls2.lock().map_err(|e| e.to_string())?, vec![5, 6]);
        Ok(())
    }

    #[test]
    fn test_trajectory_recorder_frames() -> TestResult {
        let graph = tiny_graph()?;
        let recorder = TrajectoryRecorder::new();
        assert!(recorder.is_empty());

        recorder.record_initial(&graph)?;

        let mut observers = OptObserverVec::new();
        observers.add(recorder.clone());
        observers.set_iteration_metrics(0.5, 0.25);
        observers.notify(&graph, 0);
        // Metrics are consumed by the frame they belong to
        observers.notify(&graph, 1);

        let frames = recorder.frames()?;
        assert_eq!(recorder.len(), 3);
        assert_eq!(frames[0].iteration, None);
        assert_eq!(frames[0].cost, Some(0.0));
        assert_eq!(frames[1].iteration, Some(0));
        assert_eq!(frames[1].cost, Some(0.5));
        assert_eq!(frames[1].step_norm, Some(0.25));
        assert_eq!(frames[2].cost, None);
        assert_eq!(frames[1].poses, graph.poses());
        assert_eq!(frames[1].landmarks, graph.landmarks());
        Ok(())
    }
}
