//! Fan render calls out over every (viewport, url) target.
//!
//! A fixed number of workers share one queue of targets. Each worker claims
//! the next unclaimed target, renders it, appends the result to its own
//! accumulator, and repeats until the queue is drained. The accumulators are
//! concatenated in worker order at the end. The first failed render fails
//! the whole run and drops the calls still in flight.

use std::sync::atomic::{AtomicUsize, Ordering};

use dodeca_critical_config::{Dimension, MAX_PARALLEL};
use futures::future::try_join_all;
use serde_json::{Map, Value};

use crate::error::RenderError;
use crate::renderer::{CriticalRenderer, PER_TARGET_KEYS, RenderRequest, RenderTarget};

/// Every viewport crossed with every url, viewport-major.
pub fn build_targets(base_url: &str, urls: &[String], dimensions: &[Dimension]) -> Vec<RenderTarget> {
    let base = base_url.trim_end_matches('/');
    dimensions
        .iter()
        .flat_map(|dim| {
            urls.iter().map(move |url| RenderTarget {
                url: format!("{base}{url}"),
                width: dim.width,
                height: dim.height,
            })
        })
        .collect()
}

/// Number of workers to start for `targets` targets.
pub fn worker_count(parallel: u32, targets: usize) -> usize {
    (parallel.clamp(1, MAX_PARALLEL) as usize).min(targets)
}

/// Passthrough options that get replaced by per-target values.
pub fn overridden_options(options: &Map<String, Value>) -> Vec<&'static str> {
    PER_TARGET_KEYS
        .into_iter()
        .filter(|key| options.contains_key(*key))
        .collect()
}

/// Hands out each target exactly once, to whichever worker asks first.
struct TargetQueue<'a> {
    targets: &'a [RenderTarget],
    cursor: AtomicUsize,
}

impl<'a> TargetQueue<'a> {
    fn new(targets: &'a [RenderTarget]) -> Self {
        Self {
            targets,
            cursor: AtomicUsize::new(0),
        }
    }

    fn claim(&self) -> Option<&'a RenderTarget> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.targets.get(index)
    }
}

/// Render every target and return the merged critical CSS.
pub async fn extract_critical<R>(
    renderer: &R,
    targets: &[RenderTarget],
    css: &str,
    options: &Map<String, Value>,
    parallel: u32,
) -> Result<String, RenderError>
where
    R: CriticalRenderer + ?Sized,
{
    if targets.is_empty() {
        return Ok(String::new());
    }

    let overridden = overridden_options(options);
    if !overridden.is_empty() {
        tracing::warn!(
            options = ?overridden,
            "render options are set per target and will be overridden"
        );
    }

    let workers = worker_count(parallel, targets.len());
    tracing::info!(targets = targets.len(), workers, "extracting critical CSS");

    let queue = TargetQueue::new(targets);
    let queue = &queue;

    let jobs = (0..workers).map(|worker| async move {
        let mut output = String::new();
        while let Some(target) = queue.claim() {
            tracing::debug!(worker, url = %target.url, width = target.width, height = target.height, "rendering");
            let request = RenderRequest {
                target,
                css,
                options,
            };
            let critical = renderer.render(&request).await?;
            output.push_str(&critical);
        }
        Ok::<_, RenderError>(output)
    });

    let outputs = try_join_all(jobs).await?;
    Ok(outputs.concat())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MockRenderer {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl CriticalRenderer for MockRenderer {
        async fn render(&self, request: &RenderRequest<'_>) -> Result<String, RenderError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.calls.lock().unwrap().push(request.target.url.clone());

            let failing = self.fail_on.as_deref() == Some(request.target.url.as_str());
            let delay = if failing { 1 } else { 20 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if failing {
                return Err(RenderError::Failed {
                    url: request.target.url.clone(),
                    message: "boom".into(),
                });
            }
            Ok(format!(
                ".t-{}-{}{{x:y}}",
                request.target.width,
                request.target.url.trim_start_matches("http://h")
            ))
        }
    }

    fn dims(pairs: &[(u32, u32)]) -> Vec<Dimension> {
        pairs.iter().map(|&(w, h)| Dimension::new(w, h)).collect()
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_targets_are_dimension_major() {
        let targets = build_targets(
            "http://h/",
            &urls(&["/", "/a"]),
            &dims(&[(100, 200), (300, 400)]),
        );
        let got: Vec<_> = targets
            .iter()
            .map(|t| (t.url.as_str(), t.width, t.height))
            .collect();
        assert_eq!(
            got,
            vec![
                ("http://h/", 100, 200),
                ("http://h/a", 100, 200),
                ("http://h/", 300, 400),
                ("http://h/a", 300, 400),
            ]
        );
    }

    #[test]
    fn test_worker_count_is_clamped() {
        assert_eq!(worker_count(10, 3), 3);
        assert_eq!(worker_count(10, 100), 5);
        assert_eq!(worker_count(0, 4), 1);
        assert_eq!(worker_count(2, 4), 2);
        assert_eq!(worker_count(5, 0), 0);
    }

    #[test]
    fn test_overridden_options() {
        let options = serde_json::json!({ "url": "x", "timeout": 1, "cssString": "" });
        assert_eq!(
            overridden_options(options.as_object().unwrap()),
            vec!["url", "cssString"]
        );
    }

    #[tokio::test]
    async fn test_every_target_rendered_once() {
        let renderer = MockRenderer::default();
        let targets = build_targets(
            "http://h",
            &urls(&["/", "/a"]),
            &dims(&[(1, 1), (2, 2)]),
        );
        let out = extract_critical(&renderer, &targets, ".full{}", &Map::new(), 2)
            .await
            .unwrap();

        let mut calls = renderer.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 4);
        calls.sort();
        calls.dedup();
        assert_eq!(calls.len(), 2, "each url rendered once per dimension");

        for fragment in [".t-1-/{x:y}", ".t-1-/a{x:y}", ".t-2-/{x:y}", ".t-2-/a{x:y}"] {
            assert_eq!(out.matches(fragment).count(), 1, "{fragment} in {out}");
        }
        assert!(renderer.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_target_count() {
        let renderer = MockRenderer::default();
        let targets = build_targets("http://h", &urls(&["/a", "/b", "/c"]), &dims(&[(1, 1)]));
        extract_critical(&renderer, &targets, "", &Map::new(), 10)
            .await
            .unwrap();
        assert_eq!(renderer.max_in_flight.load(Ordering::SeqCst), 3);
        assert_eq!(renderer.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_concurrency_capped_at_five() {
        let renderer = MockRenderer::default();
        let pages: Vec<String> = (0..12).map(|i| format!("/{i}")).collect();
        let targets = build_targets("http://h", &pages, &dims(&[(1, 1)]));
        extract_critical(&renderer, &targets, "", &Map::new(), 5)
            .await
            .unwrap();
        assert_eq!(renderer.max_in_flight.load(Ordering::SeqCst), 5);
        assert_eq!(renderer.calls.lock().unwrap().len(), 12);
    }

    #[tokio::test]
    async fn test_single_worker_preserves_target_order() {
        let renderer = MockRenderer::default();
        let targets = build_targets("http://h", &urls(&["/x", "/y"]), &dims(&[(1, 1)]));
        let out = extract_critical(&renderer, &targets, "", &Map::new(), 1)
            .await
            .unwrap();
        assert_eq!(out, ".t-1-/x{x:y}.t-1-/y{x:y}");
    }

    #[tokio::test]
    async fn test_no_targets_means_no_calls() {
        let renderer = MockRenderer::default();
        let out = extract_critical(&renderer, &[], ".a{}", &Map::new(), 5)
            .await
            .unwrap();
        assert_eq!(out, "");
        assert!(renderer.calls.lock().unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_first_failure_fails_the_run() {
        let renderer = MockRenderer {
            fail_on: Some("http://h/b".into()),
            ..Default::default()
        };
        let targets = build_targets(
            "http://h",
            &urls(&["/a", "/b", "/c", "/d", "/e", "/f"]),
            &dims(&[(1, 1)]),
        );
        let err = extract_critical(&renderer, &targets, "", &Map::new(), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Failed { ref url, .. } if url == "http://h/b"));
        // The other worker's call was dropped and nothing else got claimed.
        assert!(renderer.calls.lock().unwrap().len() < targets.len());
    }
}
