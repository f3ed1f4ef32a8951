use crate::concurrency::shutdown_requested;
use crate::CoreError;
use tracing::debug;

/// One step of a pipeline.
///
/// A step may work on the context before calling `next.run(ctx)`, skip
/// `next` to halt the chain, or work after `next` returns. Errors propagate
/// through every entered step untouched.
pub trait Action<C> {
    fn name(&self) -> &str;

    fn call(&self, ctx: &mut C, next: Next<'_, C>) -> Result<(), CoreError>;
}

/// The remainder of a pipeline after the current step.
pub struct Next<'a, C> {
    rest: &'a [Box<dyn Action<C>>],
}

impl<C> Next<'_, C> {
    /// Run the remaining steps. Refuses to enter a step after shutdown was
    /// requested.
    pub fn run(self, ctx: &mut C) -> Result<(), CoreError> {
        let Some((step, rest)) = self.rest.split_first() else {
            return Ok(());
        };
        if shutdown_requested() {
            return Err(CoreError::Interrupted);
        }
        debug!("action: {}", step.name());
        step.call(ctx, Next { rest })
    }
}

struct FnAction<F> {
    name: String,
    f: F,
}

/// Wrap a closure as a named step.
pub fn from_fn<C, F>(name: &str, f: F) -> impl Action<C>
where
    F: Fn(&mut C, Next<'_, C>) -> Result<(), CoreError>,
{
    FnAction {
        name: name.to_owned(),
        f,
    }
}

impl<C, F> Action<C> for FnAction<F>
where
    F: Fn(&mut C, Next<'_, C>) -> Result<(), CoreError>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, ctx: &mut C, next: Next<'_, C>) -> Result<(), CoreError> {
        (self.f)(ctx, next)
    }
}

type Factory<C> = Box<dyn FnOnce(&C) -> Box<dyn Action<C>>>;

struct Step<C> {
    name: String,
    factory: Factory<C>,
}

/// Ordered list of step factories, editable by name until built.
pub struct Builder<C> {
    steps: Vec<Step<C>>,
}

impl<C: 'static> Default for Builder<C> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<C: 'static> Builder<C> {
    pub fn new() -> Self {
        Self::default()
    }

    fn step(action: impl Action<C> + 'static) -> Step<C> {
        Step {
            name: action.name().to_owned(),
            factory: Box::new(move |_| Box::new(action)),
        }
    }

    fn position(&self, name: &str) -> Result<usize, CoreError> {
        self.steps
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| CoreError::UnknownAction(name.to_owned()))
    }

    pub fn use_action(&mut self, action: impl Action<C> + 'static) -> &mut Self {
        self.steps.push(Self::step(action));
        self
    }

    pub fn use_fn<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(&mut C, Next<'_, C>) -> Result<(), CoreError> + 'static,
    {
        self.use_action(FnAction {
            name: name.to_owned(),
            f,
        })
    }

    /// Add a step constructed from the initial context at build time.
    pub fn use_factory<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: FnOnce(&C) -> Box<dyn Action<C>> + 'static,
    {
        self.steps.push(Step {
            name: name.to_owned(),
            factory: Box::new(factory),
        });
        self
    }

    pub fn insert_before(
        &mut self,
        target: &str,
        action: impl Action<C> + 'static,
    ) -> Result<&mut Self, CoreError> {
        let at = self.position(target)?;
        self.steps.insert(at, Self::step(action));
        Ok(self)
    }

    pub fn insert_after(
        &mut self,
        target: &str,
        action: impl Action<C> + 'static,
    ) -> Result<&mut Self, CoreError> {
        let at = self.position(target)?;
        self.steps.insert(at + 1, Self::step(action));
        Ok(self)
    }

    pub fn replace(
        &mut self,
        target: &str,
        action: impl Action<C> + 'static,
    ) -> Result<&mut Self, CoreError> {
        let at = self.position(target)?;
        self.steps[at] = Self::step(action);
        Ok(self)
    }

    pub fn delete(&mut self, target: &str) -> Result<&mut Self, CoreError> {
        let at = self.position(target)?;
        self.steps.remove(at);
        Ok(self)
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn build(self, initial: &C) -> Pipeline<C> {
        Pipeline {
            steps: self
                .steps
                .into_iter()
                .map(|s| (s.factory)(initial))
                .collect(),
        }
    }
}

/// A built, reusable chain of steps.
pub struct Pipeline<C> {
    steps: Vec<Box<dyn Action<C>>>,
}

impl<C> Pipeline<C> {
    pub fn run(&self, ctx: &mut C) -> Result<(), CoreError> {
        Next { rest: &self.steps }.run(ctx)
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

/// Runs one of two sub-pipelines, then continues with the outer chain.
///
/// A halt inside the chosen sub-pipeline only ends that sub-pipeline.
pub struct Branch<C> {
    name: String,
    predicate: Box<dyn Fn(&C) -> bool>,
    then: Pipeline<C>,
    otherwise: Pipeline<C>,
}

impl<C> Branch<C> {
    pub fn new(
        name: &str,
        predicate: impl Fn(&C) -> bool + 'static,
        then: Pipeline<C>,
        otherwise: Pipeline<C>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            predicate: Box::new(predicate),
            then,
            otherwise,
        }
    }
}

impl<C> Action<C> for Branch<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, ctx: &mut C, next: Next<'_, C>) -> Result<(), CoreError> {
        if (self.predicate)(ctx) {
            self.then.run(ctx)?;
        } else {
            self.otherwise.run(ctx)?;
        }
        next.run(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Vec<String>;

    fn recording(builder: &mut Builder<Log>, name: &'static str) {
        builder.use_fn(name, move |log: &mut Log, next| {
            log.push(format!("before {name}"));
            next.run(log)?;
            log.push(format!("after {name}"));
            Ok(())
        });
    }

    fn halting(builder: &mut Builder<Log>, name: &'static str) {
        builder.use_fn(name, move |log: &mut Log, _next| {
            log.push(format!("halt {name}"));
            Ok(())
        });
    }

    #[test]
    fn after_logic_runs_in_reverse_order() {
        let mut b = Builder::new();
        recording(&mut b, "a");
        recording(&mut b, "b");
        recording(&mut b, "c");
        let pipeline = b.build(&Vec::new());
        let mut log = Vec::new();
        pipeline.run(&mut log).unwrap();
        assert_eq!(
            log,
            vec!["before a", "before b", "before c", "after c", "after b", "after a"]
        );
    }

    #[test]
    fn halting_step_stops_later_steps() {
        let mut b = Builder::new();
        recording(&mut b, "a");
        halting(&mut b, "b");
        recording(&mut b, "c");
        let pipeline = b.build(&Vec::new());
        let mut log = Vec::new();
        pipeline.run(&mut log).unwrap();
        assert_eq!(log, vec!["before a", "halt b", "after a"]);
    }

    #[test]
    fn errors_propagate_through_entered_steps() {
        let mut b = Builder::new();
        b.use_fn("guard", |log: &mut Log, next| {
            log.push("enter".to_owned());
            let result = next.run(log);
            log.push("cleanup".to_owned());
            result
        });
        b.use_fn("fail", |_log: &mut Log, _next| Err(CoreError::NoImage("m".to_owned())));
        recording(&mut b, "never");
        let pipeline = b.build(&Vec::new());
        let mut log = Vec::new();
        let err = pipeline.run(&mut log).unwrap_err();
        assert!(matches!(err, CoreError::NoImage(_)));
        assert_eq!(log, vec!["enter", "cleanup"]);
    }

    #[test]
    fn pipeline_is_reusable() {
        let mut b = Builder::new();
        recording(&mut b, "a");
        let pipeline = b.build(&Vec::new());
        let mut first = Vec::new();
        let mut second = Vec::new();
        pipeline.run(&mut first).unwrap();
        pipeline.run(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn edits_by_name() {
        let mut b = Builder::new();
        recording(&mut b, "a");
        recording(&mut b, "c");
        b.insert_before(
            "c",
            from_fn("b", |log: &mut Log, next| {
                log.push("b".to_owned());
                next.run(log)
            }),
        )
        .unwrap();
        b.insert_after(
            "c",
            from_fn("d", |log: &mut Log, next| {
                log.push("d".to_owned());
                next.run(log)
            }),
        )
        .unwrap();
        b.delete("a").unwrap();
        assert_eq!(b.names(), vec!["b", "c", "d"]);
        assert!(matches!(b.delete("zzz"), Err(CoreError::UnknownAction(_))));

        let mut log = Vec::new();
        b.build(&Vec::new()).run(&mut log).unwrap();
        assert_eq!(log, vec!["b", "before c", "d", "after c"]);
    }

    #[test]
    fn replace_keeps_position() {
        let mut b = Builder::new();
        recording(&mut b, "a");
        recording(&mut b, "b");
        b.replace(
            "a",
            from_fn("z", |log: &mut Log, next| {
                log.push("z".to_owned());
                next.run(log)
            }),
        )
        .unwrap();
        assert_eq!(b.names(), vec!["z", "b"]);
    }

    #[test]
    fn factory_sees_initial_context() {
        let mut b = Builder::new();
        b.use_factory("seeded", |initial: &Log| {
            let seed = initial.len();
            Box::new(from_fn("seeded", move |log: &mut Log, next| {
                log.push(format!("seed {seed}"));
                next.run(log)
            }))
        });
        let pipeline = b.build(&vec!["x".to_owned(), "y".to_owned()]);
        let mut log = Vec::new();
        pipeline.run(&mut log).unwrap();
        assert_eq!(log, vec!["seed 2"]);
    }

    #[test]
    fn branch_halt_only_ends_sub_pipeline() {
        let mut then = Builder::new();
        halting(&mut then, "inner");
        recording(&mut then, "skipped");
        let mut otherwise = Builder::new();
        recording(&mut otherwise, "other");

        let mut b = Builder::new();
        b.use_factory("branch", move |initial: &Log| {
            Box::new(Branch::new(
                "branch",
                |log: &Log| log.is_empty(),
                then.build(initial),
                otherwise.build(initial),
            ))
        });
        recording(&mut b, "tail");
        let pipeline = b.build(&Vec::new());

        let mut log = Vec::new();
        pipeline.run(&mut log).unwrap();
        assert_eq!(log, vec!["halt inner", "before tail", "after tail"]);

        let mut log = vec!["seed".to_owned()];
        pipeline.run(&mut log).unwrap();
        assert_eq!(
            log,
            vec!["seed", "before other", "after other", "before tail", "after tail"]
        );
    }
}
