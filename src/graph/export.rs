//! Serializable description of a finished net's execution plan.

use serde::Serialize;

use super::topology::NodeKind;
use super::Net;
use crate::errors::Result;
use crate::kernel::{DType, Element};

/// Export format for a whole plan.
#[derive(Debug, Clone, Serialize)]
pub struct PlanExport {
    pub name: String,
    pub dtype: DType,
    /// Layers in forward order.
    pub forward: Vec<LayerExport>,
    /// Layers in backward order.
    pub backward: Vec<BackwardExport>,
    /// Parameters in `Net::params` order.
    pub params: Vec<ParamExport>,
    pub blobs: Vec<BlobExport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerExport {
    pub name: String,
    pub needs: Vec<String>,
    pub provides: Vec<String>,
    pub need_backward: bool,
    pub need_input_gradient: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackwardExport {
    pub name: String,
    pub need_input_gradient: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamExport {
    pub layer: String,
    pub slot: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlobExport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<String>,
    /// Current data shape, absent until the blob is first written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
}

impl<A: Element> Net<A> {
    /// Describes the execution plan and the current blob shapes.
    pub fn plan_export(&self) -> Result<PlanExport> {
        let plan = self.plan()?;
        let forward: Vec<LayerExport> = plan
            .forward
            .iter()
            .map(|&index| {
                let entry = &self.layers[index];
                let schedule = plan.layers[index];
                LayerExport {
                    name: self.layer_name(index).to_string(),
                    needs: self.blob_names(&entry.needs),
                    provides: self.blob_names(&entry.provides),
                    need_backward: schedule.need_backward,
                    need_input_gradient: schedule.need_input_gradient,
                }
            })
            .collect();

        let backward = plan
            .backward
            .iter()
            .map(|step| BackwardExport {
                name: self.layer_name(step.layer).to_string(),
                need_input_gradient: step.need_input_gradient,
            })
            .collect();

        let params = plan
            .params
            .iter()
            .map(|param| ParamExport {
                layer: self.layer_name(param.layer).to_string(),
                slot: param.slot,
                shape: self.layers[param.layer]
                    .layer
                    .parameters()
                    .get(param.slot)
                    .and_then(|blob| blob.shape().ok()),
            })
            .collect();

        let mut blobs = Vec::with_capacity(self.num_blobs());
        for (_, node) in self.topology.nodes() {
            if let NodeKind::Blob(index) = node.kind {
                blobs.push(BlobExport {
                    name: node.name.clone(),
                    producer: node.preds.first().map(|&id| self.topology.node(id).name.clone()),
                    consumer: node.succs.first().map(|&id| self.topology.node(id).name.clone()),
                    shape: self.blobs[index].shape().ok(),
                });
            }
        }

        Ok(PlanExport {
            name: self.name.clone(),
            dtype: A::DTYPE,
            forward,
            backward,
            params,
            blobs,
        })
    }

    /// Serializes [`Net::plan_export`] to pretty-printed JSON.
    pub fn export_plan_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.plan_export()?)?)
    }
}
