//! Replaying schedule scripts against a module.

use crate::config::{ScheduleConfig, ScheduleScript, ScheduleStep};
use crate::ir::module::Module;
use crate::schedule::{Frontend, Schedule};
use anyhow::{anyhow, Context, Result};
use log::info;

/// Apply every step of `script` to `module` and return the rewritten module.
pub fn apply_script(module: Module, config: &ScheduleConfig, script: &ScheduleScript) -> Result<Module> {
    if config.strict {
        let mut sched = Schedule::strict(module, config.device);
        run_steps(&mut sched, script)?;
        Ok(sched.into_module())
    } else {
        let mut sched = Schedule::new(module, config.device).with_level(config.error_level);
        run_steps(&mut sched, script)?;
        Ok(sched.into_module())
    }
}

fn run_steps<F: Frontend>(sched: &mut Schedule<F>, script: &ScheduleScript) -> Result<()> {
    for (i, step) in script.steps.iter().enumerate() {
        info!("step {}: {} on {}", i, step.primitive(), step.block());
        apply_step(sched, step)
            .with_context(|| format!("step {} ({} on block `{}`) failed", i, step.primitive(), step.block()))?;
    }
    Ok(())
}

fn apply_step<F: Frontend>(sched: &mut Schedule<F>, step: &ScheduleStep) -> Result<()> {
    let block = sched
        .get_block(step.block())
        .ok_or_else(|| anyhow!("no block named `{}`", step.block()))?;
    match step {
        ScheduleStep::CacheRead { read_index, memory, .. } => {
            F::lift(sched.cache_read(block, *read_index, *memory))?;
        }
        ScheduleStep::CacheWrite { write_index, memory, .. } => {
            F::lift(sched.cache_write(block, *write_index, *memory))?;
        }
        ScheduleStep::SyncThreads { loop_depth, after, .. } => {
            let node = match loop_depth {
                Some(depth) => *sched
                    .get_loops(block)
                    .get(*depth)
                    .ok_or_else(|| anyhow!("block `{}` has no loop at depth {}", step.block(), depth))?,
                None => block,
            };
            F::lift(sched.sync_threads(node, *after))?;
        }
        ScheduleStep::SetBuffer { memory, fixed, .. } => {
            F::lift(sched.set_buffer(block, *memory, *fixed))?;
        }
    }
    Ok(())
}
