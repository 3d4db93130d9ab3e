//! Grid launch across independent CTAs
//!
//! CTAs share nothing but the kernel, so each one runs on its own rayon
//! task with its own mechanism instance.

use crate::config::EmulatorConfig;
use crate::cta::{CooperativeThreadArray, CtaReport};
use crate::error::Result;
use crate::isa::Kernel;
use crate::lanes::LaneFile;
use rayon::prelude::*;
use simt_tracing::perf_span;
use std::sync::Arc;
use tracing::info;

/// Emulate `cta_count` CTAs of `kernel`, returning reports in CTA order
pub fn launch_grid(kernel: Arc<Kernel>, config: &EmulatorConfig, cta_count: usize) -> Result<Vec<CtaReport>> {
    launch_grid_with(kernel, config, cta_count, |_, _| Ok(()))
}

/// Like [`launch_grid`], seeding each CTA's registers with `init(cta_id, lanes)` first
pub fn launch_grid_with<F>(
    kernel: Arc<Kernel>,
    config: &EmulatorConfig,
    cta_count: usize,
    init: F,
) -> Result<Vec<CtaReport>>
where
    F: Fn(usize, &mut LaneFile) -> Result<()> + Sync,
{
    let _span = perf_span!(
        "launch_grid",
        ctas = cta_count,
        cta_size = config.cta_size,
        mechanism = config.mechanism.as_str()
    );
    config.validate()?;
    kernel.validate()?;

    let reports = (0..cta_count)
        .into_par_iter()
        .map(|cta_id| {
            let mut cta = CooperativeThreadArray::new(Arc::clone(&kernel), config)?.with_id(cta_id);
            init(cta_id, cta.lanes_mut())?;
            cta.run()
        })
        .collect::<Result<Vec<_>>>()?;

    let dynamic_instructions: u64 = reports.iter().map(|report| report.dynamic_instructions).sum();
    info!(
        kernel = %kernel.name,
        mechanism = %config.mechanism,
        ctas = cta_count,
        dynamic_instructions,
        "grid complete"
    );
    Ok(reports)
}
