//! Light scene bookkeeping
//!
//! A light entering the scene gets a [`LightSceneInfo`] record holding the
//! injected capability proxy and the heads of its intrusive interaction
//! lists. The proxy is the scene's only window into the host's light object;
//! everything the interaction graph needs is asked through it.

use crate::scene::interaction::InteractionKey;

/// Stable integer id of a light within the scene
///
/// Ids are recycled after removal, but never while interactions referencing
/// the old light still exist; removal fully unlinks first.
pub type LightId = usize;

/// Types of lights the interaction graph distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightType {
    /// Directional light (like sunlight) with parallel rays
    Directional,
    /// Point light that radiates in all directions from a position
    Point,
    /// Spot light that creates a cone of light from a position
    Spot,
}

/// Movability class of a scene object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mobility {
    /// Never moves; lighting can be fully baked
    Static,
    /// Doesn't move, but can change at runtime (color, intensity); shadowing
    /// can still be baked
    Stationary,
    /// Moves freely; nothing about it can be baked
    Movable,
}

/// Capabilities the scene requires from the host's light objects
///
/// Injected at [`Scene::add_light`](crate::scene::Scene::add_light); the
/// interaction graph never implements these itself.
pub trait LightProxy {
    /// The light's type
    fn light_type(&self) -> LightType;

    /// The light's movability class
    fn mobility(&self) -> Mobility;

    /// Whether the light can cast shadows onto static-lighting primitives
    /// through baked shadow maps
    fn casts_static_shadow(&self) -> bool;

    /// Whether the light can cast dynamically rendered shadows
    fn casts_dynamic_shadow(&self) -> bool;

    /// Whether the light casts dedicated shadows for translucent objects
    fn casts_translucent_shadows(&self) -> bool;

    /// Whether the light's shadowing is baked (static and stationary lights)
    fn has_static_shadowing(&self) -> bool {
        self.mobility() != Mobility::Movable
    }

    /// Whether the light's direct lighting is baked (static lights only)
    fn has_static_lighting(&self) -> bool {
        self.mobility() == Mobility::Static
    }

    /// Whether the light moves at runtime
    fn is_movable(&self) -> bool {
        self.mobility() == Mobility::Movable
    }
}

/// Per-light bookkeeping owned by the scene
pub struct LightSceneInfo {
    /// Capability proxy supplied by the host
    pub(crate) proxy: Box<dyn LightProxy>,

    /// Head of the interaction list for often-moving primitives
    pub(crate) often_moving_primitive_list: Option<InteractionKey>,

    /// Head of the interaction list for primitives that rarely move
    pub(crate) static_primitive_list: Option<InteractionKey>,

    /// Interactions on this light forced into dynamic shadows by unbuilt
    /// static lighting; surfaces as the editor's "lighting needs to be
    /// rebuilt" state
    pub(crate) num_unbuilt_interactions: u32,
}

impl LightSceneInfo {
    pub(crate) fn new(proxy: Box<dyn LightProxy>) -> Self {
        Self {
            proxy,
            often_moving_primitive_list: None,
            static_primitive_list: None,
            num_unbuilt_interactions: 0,
        }
    }

    /// The injected capability proxy
    pub fn proxy(&self) -> &dyn LightProxy {
        &*self.proxy
    }

    /// Number of interactions on this light with unbuilt static lighting
    pub fn num_unbuilt_interactions(&self) -> u32 {
        self.num_unbuilt_interactions
    }
}
