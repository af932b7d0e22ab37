use async_trait::async_trait;

use crate::logging::Tracer;
use crate::step::StepName;

/// Why a strategy declined to produce a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skip(pub String);

impl Skip {
    pub fn new(reason: impl Into<String>) -> Self {
        Skip(reason.into())
    }
}

impl std::fmt::Display for Skip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait Strategy<I, O>: Send + Sync
where
    I: Sync + ?Sized,
    O: Send,
{
    fn name(&self) -> &'static str;

    async fn attempt(&self, input: &I) -> Result<O, Skip>;
}

/// Output of the first strategy that succeeded.
#[derive(Debug)]
pub struct Resolved<O> {
    pub strategy: &'static str,
    pub value: O,
}

/// Every strategy skipped; reasons are kept in evaluation order.
#[derive(Debug, Default)]
pub struct Exhausted {
    pub skips: Vec<(&'static str, Skip)>,
}

impl Exhausted {
    pub fn last_reason(&self) -> Option<&str> {
        self.skips.last().map(|(_, skip)| skip.0.as_str())
    }

    pub fn summary(&self) -> String {
        self.skips
            .iter()
            .map(|(name, skip)| format!("{}: {}", name, skip))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Ordered strategies, evaluated in sequence until one succeeds.
pub struct Chain<I: Sync + ?Sized, O: Send> {
    strategies: Vec<Box<dyn Strategy<I, O>>>,
}

impl<I, O> Chain<I, O>
where
    I: Sync + ?Sized,
    O: Send,
{
    pub fn new() -> Self {
        Self { strategies: Vec::new() }
    }

    pub fn with(mut self, strategy: impl Strategy<I, O> + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, input: &I, stage: StepName, tracer: &dyn Tracer) -> Result<Resolved<O>, Exhausted> {
        let mut exhausted = Exhausted::default();
        for strategy in &self.strategies {
            let name = strategy.name();
            tracer.attempt(stage, name);
            match strategy.attempt(input).await {
                Ok(value) => return Ok(Resolved { strategy: name, value }),
                Err(skip) => {
                    tracer.skipped(stage, &format!("{}: {}", name, skip));
                    exhausted.skips.push((name, skip));
                }
            }
        }
        Err(exhausted)
    }
}

impl<I, O> Default for Chain<I, O>
where
    I: Sync + ?Sized,
    O: Send,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{EventKind, RecordingTracer};

    struct Fixed(&'static str, Option<u32>);

    #[async_trait]
    impl Strategy<str, u32> for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn attempt(&self, _input: &str) -> Result<u32, Skip> {
            self.1.ok_or_else(|| Skip::new("nothing here"))
        }
    }

    #[tokio::test]
    async fn first_success_wins() {
        let chain = Chain::new().with(Fixed("a", None)).with(Fixed("b", Some(2))).with(Fixed("c", Some(3)));
        let tracer = RecordingTracer::new();

        let resolved = chain.run("x", StepName::RetrievingContent, &tracer).await.unwrap();
        assert_eq!(resolved.strategy, "b");
        assert_eq!(resolved.value, 2);

        let attempts: Vec<String> = tracer.events_of(EventKind::Attempt).into_iter().map(|e| e.detail).collect();
        assert_eq!(attempts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn exhaustion_keeps_every_reason() {
        let chain = Chain::new().with(Fixed("a", None)).with(Fixed("b", None));
        let err = chain
            .run("x", StepName::SearchingSimilarArticles, &RecordingTracer::new())
            .await
            .unwrap_err();
        assert_eq!(err.skips.len(), 2);
        assert_eq!(err.summary(), "a: nothing here; b: nothing here");
    }
}
