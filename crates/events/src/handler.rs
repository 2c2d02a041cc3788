/// Execute an aggregate command deterministically (no IO, no async).
///
/// Decide (`handle`) then evolve (`apply` each event) in one step, mutating
/// the aggregate in place. Useful in unit tests and inline flows; the
/// dispatcher provides the persistent variant with optimistic concurrency.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: plaza_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
