//! Owns the configured observables, their record buffers and the output file.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::output::{BlockRecord, EstimatorWriter, Metadata, OutputOptions};
use super::{Estimator, EstimatorContext, EstimatorSchema, EstimatorSetup, ObservableKind};
use crate::comm::{coordinator_status, Communicator};
use crate::error::{AfqmcError, Result};
use crate::linalg::{flatten_complex, unflatten_complex, ZERO};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EstimatorOptions {
    /// Observable name to its options; `energy` is always measured
    pub observables: BTreeMap<String, serde_yaml::Value>,
    /// Reduce and write every this many blocks
    pub write_frequency: usize,
    pub output: OutputOptions,
}

impl Default for EstimatorOptions {
    fn default() -> Self {
        let mut observables = BTreeMap::new();
        observables.insert(ObservableKind::Energy.name().to_string(), serde_yaml::Value::Null);
        Self { observables, write_frequency: 1, output: OutputOptions::default() }
    }
}

#[derive(Debug)]
struct Slot {
    kind: ObservableKind,
    estimator: Box<dyn Estimator>,
    offset: usize,
    len: usize,
    nevals: usize,
}

#[derive(Debug)]
pub struct EstimatorHandler {
    slots: Vec<Slot>,
    schema: EstimatorSchema,
    local: Vec<Complex64>,
    global: Vec<Complex64>,
    write_frequency: usize,
    writer: Option<EstimatorWriter>,
    comm: Arc<dyn Communicator>,
}

impl EstimatorHandler {
    /// Build every observable and, on the root worker, create the output file.
    ///
    /// Collective over `comm`: a failure to create the file on the root fails
    /// every worker.
    pub fn new(
        options: &EstimatorOptions,
        setup: &EstimatorSetup<'_>,
        comm: Arc<dyn Communicator>,
        config_echo: &str,
    ) -> Result<Self> {
        if options.write_frequency == 0 {
            return Err(AfqmcError::InvalidConfig("write_frequency must be positive".to_string()));
        }
        let mut requested = BTreeMap::new();
        for (name, opts) in options.observables.iter() {
            requested.insert(ObservableKind::from_name(name)?, opts.clone());
        }
        requested.entry(ObservableKind::Energy).or_insert(serde_yaml::Value::Null);

        let mut slots = Vec::with_capacity(requested.len());
        let mut offset = 0;
        for (kind, opts) in requested {
            let estimator = kind.build(&opts, setup)?;
            let len = estimator.schema().len();
            slots.push(Slot { kind, estimator, offset, len, nevals: 0 });
            offset += len;
        }
        let schema = EstimatorSchema::concat(slots.iter().map(|s| (s.kind.name(), s.estimator.schema())));

        let mut writer = None;
        let outcome = if comm.is_root() {
            let path = options.output.resolve_path();
            let metadata = Metadata { config: config_echo.to_string(), schema: schema.clone(), nworkers: comm.size() };
            match EstimatorWriter::create(&path, metadata) {
                Ok(w) => {
                    info!("writing estimates to {}", path.display());
                    writer = Some(w);
                    Ok(())
                }
                Err(e) => Err(format!("{}: {}", path.display(), e)),
            }
        } else {
            Ok(())
        };
        coordinator_status(comm.as_ref(), outcome)?;

        Ok(Self {
            local: vec![ZERO; schema.len()],
            global: vec![ZERO; schema.len()],
            slots,
            schema,
            write_frequency: options.write_frequency,
            writer,
            comm,
        })
    }

    pub fn schema(&self) -> &EstimatorSchema {
        &self.schema
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.writer.as_ref().map(|w| w.path())
    }

    pub fn write_frequency(&self) -> usize {
        self.write_frequency
    }

    /// Evaluate the observables due at `step` into the local record.
    pub fn compute_estimators(&mut self, step: usize, ctx: &mut EstimatorContext<'_>) -> Result<()> {
        for slot in self.slots.iter_mut() {
            if step % slot.estimator.eval_freq() != 0 {
                continue;
            }
            let local = &mut self.local[slot.offset..slot.offset + slot.len];
            slot.estimator.compute(ctx, local)?;
            slot.nevals += 1;
        }
        Ok(())
    }

    /// Whether any observable is evaluated at `step`.
    pub fn is_due(&self, step: usize) -> bool {
        self.slots.iter().any(|s| step % s.estimator.eval_freq() == 0)
    }

    /// Close block `block` (counted from one). On write blocks the local
    /// records are reduced, finalised, appended by the root and reset; the
    /// reduced record is returned on every worker.
    pub fn end_block(&mut self, block: usize) -> Result<Option<BlockRecord>> {
        if block % self.write_frequency != 0 {
            return Ok(None);
        }
        self.global = unflatten_complex(&self.comm.sum_reduce(&flatten_complex(&self.local)));
        for slot in self.slots.iter() {
            let global = &mut self.global[slot.offset..slot.offset + slot.len];
            slot.estimator.finalise_block(global, slot.nevals);
        }
        let record = BlockRecord { block, values: self.global.clone() };

        let outcome = match self.writer.as_mut() {
            Some(w) => w.append(record.clone()).map_err(|e| format!("{}: {}", w.path().display(), e)),
            None => Ok(()),
        };
        coordinator_status(self.comm.as_ref(), outcome)?;
        debug!("block {} reduced and written", block);

        self.local.iter_mut().for_each(|v| *v = ZERO);
        for slot in self.slots.iter_mut() {
            slot.nevals = 0;
        }
        Ok(Some(record))
    }

    /// Slice of field `name` inside a reduced record.
    pub fn field<'r>(&self, record: &'r BlockRecord, name: &str) -> Option<&'r [Complex64]> {
        self.schema.field(name).map(|f| &record.values[f.range()])
    }

    /// Mixed energy of a reduced record.
    pub fn energy(&self, record: &BlockRecord) -> Option<Complex64> {
        self.field(record, "energy/ETotal").and_then(|v| v.first().copied())
    }
}
