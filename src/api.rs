//! The plugin API boundary.
//!
//! Entry points are named `<Plugin>.<Function>` and versioned. Each one receives
//! its arguments and returns its results exclusively through an
//! [`ArgumentFrame`], in a fixed push/pop order documented per entry point.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::metrics::{MetricsSink, Sample, TracingSink};
use crate::stack::{ArgumentFrame, ArgumentStack};

type EntryFn = Arc<dyn Fn(&mut ArgumentFrame) -> Result<ArgumentFrame> + Send + Sync>;

struct EntryPoint {
    version: u32,
    handler: EntryFn,
}

pub struct Api {
    entries: RwLock<HashMap<(String, String), EntryPoint>>,
    metrics: Arc<dyn MetricsSink>,
}

impl Default for Api {
    fn default() -> Self {
        Self::new()
    }
}

impl Api {
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(TracingSink))
    }

    pub fn with_metrics(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    /// Registers `handler` as `plugin.function` at `version`, replacing any previous
    /// registration of that name.
    ///
    /// The handler pops its arguments from the frame it is given and returns a new
    /// frame holding its results.
    pub fn register<F>(&self, plugin: &str, function: &str, version: u32, handler: F)
    where
        F: Fn(&mut ArgumentFrame) -> Result<ArgumentFrame> + Send + Sync + 'static,
    {
        tracing::debug!(plugin, function, version, "registered entry point");

        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                (plugin.to_owned(), function.to_owned()),
                EntryPoint {
                    version,
                    handler: Arc::new(handler),
                },
            );
    }

    pub fn contains(&self, plugin: &str, function: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(plugin.to_owned(), function.to_owned()))
    }

    /// Calls `plugin.function`, requiring at least `version`.
    ///
    /// # Errors
    /// * [`Error::UnknownEntryPoint`] - nothing is registered under that name, or only an
    ///   older version is
    /// * [`Error::LeftoverValues`] - the handler returned without reading every argument
    /// * anything the handler itself fails with, [`Error::TypeMismatch`] and
    ///   [`Error::StackUnderflow`] included
    pub fn call(&self, plugin: &str, function: &str, version: u32, mut args: ArgumentFrame) -> Result<ArgumentFrame> {
        let name = format!("{}.{}", plugin, function);

        let handler = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(&(plugin.to_owned(), function.to_owned())) {
                Some(entry) if entry.version >= version => entry.handler.clone(),
                _ => return Err(Error::UnknownEntryPoint { name, version }),
            }
        };

        let started = Instant::now();
        let result = handler(&mut args).and_then(|returned| {
            args.finish()?;
            Ok(returned)
        });

        self.metrics.push(
            Sample::new("EntryPoint")
                .elapsed(started.elapsed())
                .tag("entry_point", name.as_str()),
        );

        if let Err(error) = &result {
            tracing::warn!(entry_point = %name, %error, "entry point failed");
        }

        result
    }

    /// Runs `plugin.function` on the innermost frame of `stack`.
    ///
    /// The frame's values are the arguments; on success they are replaced by the
    /// results, ready for the caller to pop. On failure the arguments are put back
    /// untouched, so the caller can still hand them to the original implementation.
    pub fn call_on_stack(&self, stack: &ArgumentStack, plugin: &str, function: &str, version: u32) -> Result<()> {
        let args = stack.take()?;
        let untouched = args.clone();

        match self.call(plugin, function, version, args) {
            Ok(returned) => stack.replace(returned),
            Err(error) => {
                stack.replace(untouched)?;
                Err(error)
            }
        }
    }
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_list()
            .entries(entries.iter().map(|((plugin, function), entry)| {
                format!("{}.{}@{}", plugin, function, entry.version)
            }))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MemorySink;
    use crate::stack::ObjectId;

    fn api() -> Api {
        let api = Api::new();
        api.register("Util", "Add", 2, |args| {
            let a = args.pop::<i32>()?;
            let b = args.pop::<i32>()?;
            let mut out = ArgumentFrame::new();
            out.push(a + b);
            Ok(out)
        });
        api
    }

    #[test]
    fn marshals_arguments_and_results() {
        let mut args = ArgumentFrame::new();
        args.push(2i32).push(3i32);

        let mut out = api().call("Util", "Add", 1, args).unwrap();
        assert_eq!(out.pop::<i32>().unwrap(), 5);
    }

    #[test]
    fn newer_version_is_unknown() {
        let err = api().call("Util", "Add", 3, ArgumentFrame::new()).unwrap_err();

        assert!(matches!(err, Error::UnknownEntryPoint { ref name, version: 3 } if name == "Util.Add"));
    }

    #[test]
    fn unread_arguments_fail_the_call() {
        let mut args = ArgumentFrame::new();
        args.push(1i32).push(2i32).push(ObjectId(9));

        assert!(matches!(
            api().call("Util", "Add", 2, args),
            Err(Error::LeftoverValues { remaining: 1 })
        ));
    }

    #[test]
    fn wrong_argument_type_is_reported() {
        let mut args = ArgumentFrame::new();
        args.push(1i32).push(String::from("2"));

        assert!(matches!(
            api().call("Util", "Add", 2, args),
            Err(Error::TypeMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn runs_on_shared_stack() {
        let metrics = Arc::new(MemorySink::new());
        let api = Api::with_metrics(metrics.clone());
        api.register("Util", "Swap", 1, |args| {
            let a = args.pop::<i32>()?;
            let b = args.pop::<String>()?;
            let mut out = ArgumentFrame::new();
            out.push(b).push(a);
            Ok(out)
        });

        let stack = ArgumentStack::new();
        stack.begin().unwrap();
        stack.push(7i32).unwrap();
        stack.push(String::from("x")).unwrap();

        api.call_on_stack(&stack, "Util", "Swap", 1).unwrap();

        assert_eq!(stack.pop::<String>().unwrap(), "x");
        assert_eq!(stack.pop::<i32>().unwrap(), 7);
        stack.end().unwrap();

        let samples = metrics.measurements("EntryPoint");
        assert_eq!(samples[0].get_tag("entry_point"), Some("Util.Swap"));
    }

    #[test]
    fn failed_call_on_stack_keeps_arguments() {
        let api = api();

        let stack = ArgumentStack::new();
        stack.begin().unwrap();
        stack.push(ObjectId(5)).unwrap();
        stack.push(String::from("x")).unwrap();

        assert!(matches!(
            api.call_on_stack(&stack, "Util", "Add", 2),
            Err(Error::TypeMismatch { index: 0, .. })
        ));

        assert_eq!(stack.pop::<ObjectId>().unwrap(), ObjectId(5));
        assert_eq!(stack.pop::<String>().unwrap(), "x");
        stack.end().unwrap();
    }
}
