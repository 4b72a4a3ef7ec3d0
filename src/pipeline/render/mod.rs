//! Composition of engine overlays onto drawing surfaces.
//!
//! In shared-canvas mode every engine draws onto one surface. Exactly one of
//! them holds [`SurfaceRole::Primary`] and is the only one allowed to clear the
//! surface and paint the camera image; the others only add overlays, after the
//! primary. Without a shared canvas each engine gets a surface of its own and
//! is primary there.

mod canvas;
pub mod overlay;
mod recording;

use std::{collections::BTreeMap, sync::Arc};

pub use canvas::{RgbaCanvas, TextLabel};
pub use recording::{DrawOp, RecordingSurface};

use crate::types::{DetectionResult, EngineKind, Frame, Region, SurfaceRole};

pub type Color = [u8; 4];

/// Drawing target shared by the overlay renderers.
pub trait Surface {
    fn resize(&mut self, width: u32, height: u32);
    /// Starts a composed frame. Only a primary passes `clear`/`draw_base`.
    fn prepare(&mut self, frame: &Frame, clear: bool, draw_base: bool);
    fn draw_rect(&mut self, region: Region, color: Color, filled: bool);
    fn draw_point(&mut self, x: f32, y: f32, radius: f32, color: Color);
    fn draw_text(&mut self, text: &str, x: f32, y: f32, color: Color);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoleAssignment {
    pub engine: EngineKind,
    pub role: SurfaceRole,
    /// Index into the coordinator's surfaces.
    pub surface: usize,
}

/// Assigns roles for the given engines. The result is in draw order:
/// primaries first.
///
/// On a shared canvas the object engine is primary when present, since it is
/// the one that repaints the video; otherwise the first engine is.
pub fn assign_roles(engines: &[EngineKind], shared: bool) -> Vec<RoleAssignment> {
    if !shared {
        return engines
            .iter()
            .enumerate()
            .map(|(surface, &engine)| RoleAssignment {
                engine,
                role: SurfaceRole::Primary,
                surface,
            })
            .collect();
    }

    let primary = if engines.contains(&EngineKind::Object) {
        Some(EngineKind::Object)
    } else {
        engines.first().copied()
    };
    let mut assignments: Vec<RoleAssignment> = engines
        .iter()
        .map(|&engine| RoleAssignment {
            engine,
            role: if Some(engine) == primary {
                SurfaceRole::Primary
            } else {
                SurfaceRole::Secondary
            },
            surface: 0,
        })
        .collect();
    assignments.sort_by_key(|a| a.role != SurfaceRole::Primary);
    assignments
}

/// Owns the surfaces and replays each composed frame onto them in role order.
pub struct RenderCoordinator<S: Surface> {
    assignments: Vec<RoleAssignment>,
    surfaces: Vec<S>,
    shared: bool,
}

impl<S: Surface + Default> RenderCoordinator<S> {
    pub fn new(engines: &[EngineKind], shared: bool, width: u32, height: u32) -> Self {
        let assignments = assign_roles(engines, shared);
        let surface_count = if shared {
            usize::from(!engines.is_empty())
        } else {
            engines.len()
        };
        let surfaces = (0..surface_count)
            .map(|_| {
                let mut surface = S::default();
                surface.resize(width, height);
                surface
            })
            .collect();
        log::debug!("render layout (shared={shared}): {assignments:?}");

        Self {
            assignments,
            surfaces,
            shared,
        }
    }
}

impl<S: Surface> RenderCoordinator<S> {
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn assignments(&self) -> &[RoleAssignment] {
        &self.assignments
    }

    pub fn role(&self, engine: EngineKind) -> Option<SurfaceRole> {
        self.assignment(engine).map(|a| a.role)
    }

    pub fn surface(&self, engine: EngineKind) -> Option<&S> {
        self.assignment(engine)
            .and_then(|a| self.surfaces.get(a.surface))
    }

    pub fn surface_mut(&mut self, engine: EngineKind) -> Option<&mut S> {
        let index = self.assignment(engine)?.surface;
        self.surfaces.get_mut(index)
    }

    pub fn surfaces(&self) -> &[S] {
        &self.surfaces
    }

    fn assignment(&self, engine: EngineKind) -> Option<&RoleAssignment> {
        self.assignments.iter().find(|a| a.engine == engine)
    }

    /// Draws one composed frame. Primaries prepare their surface and draw
    /// first; secondaries only add their overlay. Engines without a result for
    /// this frame contribute nothing beyond the primary's base image.
    pub fn compose(
        &mut self,
        frame: &Frame,
        results: &BTreeMap<EngineKind, Arc<DetectionResult>>,
    ) {
        for assignment in &self.assignments {
            let Some(surface) = self.surfaces.get_mut(assignment.surface) else {
                continue;
            };
            if assignment.role == SurfaceRole::Primary {
                let (clear, draw_base) = assignment.role.prepare_flags();
                surface.prepare(frame, clear, draw_base);
            }
            if let Some(result) = results.get(&assignment.engine) {
                overlay::draw_result(surface, frame, result);
            }
        }
    }
}
