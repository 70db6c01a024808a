//! Demo host registry.
//!
//! Stands in for a real host application: a single in-memory project with a
//! marker list and a console, exposed under `RPR_` names so the default
//! allowed prefix admits them.

use rpr_bridge_core::{CallArgs, CallError, FunctionTable, Returns};
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::info;

pub const APP_VERSION: &str = concat!("rpr-bridge/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub index: i64,
    pub position: f64,
    pub region_end: Option<f64>,
    pub name: String,
}

impl Marker {
    pub fn is_region(&self) -> bool {
        self.region_end.is_some()
    }
}

/// The project the demo functions operate on.
#[derive(Debug, Default)]
pub struct Project {
    markers: Vec<Marker>,
    console: Vec<String>,
}

impl Project {
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn console(&self) -> &[String] {
        &self.console
    }

    /// Add a marker or region. `want_index` is honored when free, otherwise
    /// the next unused index of that kind is assigned.
    pub fn add_marker(
        &mut self,
        position: f64,
        region_end: Option<f64>,
        name: &str,
        want_index: Option<i64>,
    ) -> i64 {
        let is_region = region_end.is_some();
        let taken = |idx: i64, markers: &[Marker]| {
            markers
                .iter()
                .any(|m| m.index == idx && m.is_region() == is_region)
        };

        let index = match want_index {
            Some(idx) if idx > 0 && !taken(idx, &self.markers) => idx,
            _ => {
                let mut idx = 1;
                while taken(idx, &self.markers) {
                    idx += 1;
                }
                idx
            }
        };

        self.markers.push(Marker {
            index,
            position,
            region_end,
            name: name.to_string(),
        });
        self.markers
            .sort_by(|a, b| a.position.total_cmp(&b.position));
        index
    }

    pub fn delete_marker(&mut self, index: i64, is_region: bool) -> bool {
        let before = self.markers.len();
        self.markers
            .retain(|m| !(m.index == index && m.is_region() == is_region));
        self.markers.len() != before
    }

    /// Total, marker and region counts.
    pub fn counts(&self) -> (usize, usize, usize) {
        let regions = self.markers.iter().filter(|m| m.is_region()).count();
        (self.markers.len(), self.markers.len() - regions, regions)
    }
}

/// Build the demo registry around a shared project.
pub fn demo_registry(project: Rc<RefCell<Project>>) -> FunctionTable {
    let mut table = FunctionTable::new();

    table.register("RPR_GetAppVersion", |_| Ok(vec![Some(json!(APP_VERSION))]));

    let p = Rc::clone(&project);
    table.register("RPR_ShowConsoleMsg", move |args| {
        let msg = args.str(0)?;
        info!("console: {}", msg.trim_end());
        p.borrow_mut().console.push(msg.to_string());
        Ok(Vec::new())
    });

    let p = Rc::clone(&project);
    table.register("RPR_AddProjectMarker", move |args| add_project_marker(&p, args));

    let p = Rc::clone(&project);
    table.register("RPR_DeleteProjectMarker", move |args| {
        project_arg(args)?;
        let index = args.i64(1)?;
        let is_region = flag(args, 2)?;
        let deleted = p.borrow_mut().delete_marker(index, is_region);
        Ok(vec![Some(json!(deleted))])
    });

    let p = Rc::clone(&project);
    table.register("RPR_CountProjectMarkers", move |args| {
        project_arg(args)?;
        let (total, markers, regions) = p.borrow().counts();
        Ok(vec![
            Some(json!(total)),
            Some(json!(markers)),
            Some(json!(regions)),
        ])
    });

    let p = project;
    table.register("RPR_EnumProjectMarkers", move |args| {
        let idx = args.i64(0)?;
        let project = p.borrow();
        let found = usize::try_from(idx)
            .ok()
            .and_then(|i| project.markers().get(i));
        Ok(match found {
            Some(m) => vec![
                Some(json!(idx + 1)),
                Some(json!(m.is_region())),
                Some(json!(m.position)),
                Some(json!(m.region_end.unwrap_or(0.0))),
                Some(json!(m.name)),
                Some(json!(m.index)),
            ],
            None => vec![Some(json!(0))],
        })
    });

    table
}

// (proj, isrgn, pos, rgnend, name, wantidx)
fn add_project_marker(project: &RefCell<Project>, args: &CallArgs) -> Result<Returns, CallError> {
    project_arg(args)?;
    let is_region = flag(args, 1)?;
    let position = args.f64(2)?;
    let region_end = if is_region { Some(args.f64(3)?) } else { None };
    let name = if args.is_omitted(4) { "" } else { args.str(4)? };
    let want_index = if args.is_omitted(5) {
        None
    } else {
        Some(args.i64(5)?)
    };

    let index = project
        .borrow_mut()
        .add_marker(position, region_end, name, want_index);
    Ok(vec![Some(json!(index))])
}

/// Only the current project (`0` or null) exists.
fn project_arg(args: &CallArgs) -> Result<(), CallError> {
    if args.is_omitted(0) || args.i64(0)? == 0 {
        Ok(())
    } else {
        Err(CallError::new("only the current project (0) is available"))
    }
}

/// Host flags arrive as either booleans or 0/1.
fn flag(args: &CallArgs, index: usize) -> Result<bool, CallError> {
    match args.get(index) {
        None => Ok(false),
        Some(value) if value.is_boolean() => args.bool(index),
        Some(_) => Ok(args.i64(index)? != 0),
    }
}
