//! Light/primitive interactions
//!
//! An interaction is the materialized edge between one light and one
//! primitive, created only when the pairing is currently relevant. Edges live
//! in a slot-map slab and thread themselves through two intrusive doubly
//! linked lists: one of the owning light's per-primitive lists (split by the
//! primitive's often-moving hint) and the primitive's light list. All list
//! surgery is O(1).
//!
//! Relevance is evaluated once, at creation. A property change that could
//! flip it requires the caller to trigger re-evaluation through the scene.

use slotmap::{new_key_type, SlotMap};

use crate::scene::lights::{LightId, LightProxy, LightType};
use crate::scene::primitives::{PrimitiveKey, PrimitiveProxy};

new_key_type! {
    /// Stable key of an interaction in the scene's edge slab
    pub struct InteractionKey;
}

pub(crate) type InteractionSlab = SlotMap<InteractionKey, LightPrimitiveInteraction>;

/// Derived classification flags of a relevant light/primitive pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InteractionFlags {
    pub is_dynamic: bool,
    pub is_light_mapped: bool,
    pub is_shadow_mapped: bool,
    pub casts_shadow: bool,
    pub has_translucent_object_shadow: bool,
    pub has_inset_object_shadow: bool,
    pub self_shadow_only: bool,
}

impl InteractionFlags {
    /// Evaluate whether a light/primitive pairing needs a persistent edge,
    /// and if so with which derived flags.
    ///
    /// No edge is needed when the pairing is irrelevant or fully baked, when
    /// a light with baked shadowing meets a static-lighting primitive whose
    /// lightmap settings are invalid (those must not hold lighting unbuilt
    /// after a build), or for movable directional lights without a per-object
    /// shadow case: those resolve shadow relevance per view instead.
    pub(crate) fn evaluate(
        light: &dyn LightProxy,
        primitive: &dyn PrimitiveProxy,
    ) -> Option<Self> {
        let relevance = primitive.light_relevance(light);

        if !relevance.is_relevant || !relevance.is_dynamic {
            return None;
        }

        if light.has_static_shadowing()
            && primitive.has_static_lighting()
            && !primitive.has_valid_settings_for_static_lighting()
        {
            return None;
        }

        let has_translucent_object_shadow =
            light.casts_translucent_shadows() && primitive.casts_volumetric_translucent_shadow();

        // Inset shadows are only supported on directional lights
        let has_inset_object_shadow =
            light.light_type() == LightType::Directional && primitive.casts_inset_shadow();

        if light.light_type() == LightType::Directional
            && !light.has_static_shadowing()
            && !has_translucent_object_shadow
            && !has_inset_object_shadow
        {
            return None;
        }

        // Determine whether this light-primitive interaction produces a shadow
        let casts_shadow = if primitive.has_static_lighting() {
            let has_static_shadow = light.has_static_shadowing()
                && light.casts_static_shadow()
                && primitive.casts_static_shadow();
            let has_dynamic_shadow = !light.has_static_lighting()
                && light.casts_dynamic_shadow()
                && primitive.casts_dynamic_shadow();
            has_static_shadow || has_dynamic_shadow
        } else {
            light.casts_dynamic_shadow() && primitive.casts_dynamic_shadow()
        };

        Some(Self {
            is_dynamic: relevance.is_dynamic,
            is_light_mapped: relevance.is_light_mapped,
            is_shadow_mapped: relevance.is_shadow_mapped,
            casts_shadow,
            has_translucent_object_shadow,
            has_inset_object_shadow,
            self_shadow_only: primitive.casts_self_shadow_only(),
        })
    }
}

/// A materialized relevant relationship between one light and one primitive
pub struct LightPrimitiveInteraction {
    /// The light endpoint
    pub(crate) light_id: LightId,
    /// The primitive endpoint
    pub(crate) primitive: PrimitiveKey,

    /// The light applies dynamically rather than through fully baked data
    pub(crate) is_dynamic: bool,
    /// The light is represented in the primitive's lightmap
    pub(crate) is_light_mapped: bool,
    /// Shadowing onto the primitive is baked into a shadow map
    pub(crate) is_shadow_mapped: bool,
    /// This pairing produces a shadow
    pub(crate) casts_shadow: bool,
    /// A dedicated translucent-object shadow applies
    pub(crate) has_translucent_object_shadow: bool,
    /// A per-object inset shadow applies
    pub(crate) has_inset_object_shadow: bool,
    /// The primitive only shadows itself
    pub(crate) self_shadow_only: bool,
    /// A static-lighting primitive forced into a dynamic shadow because the
    /// light's baked data is not built yet
    pub(crate) uncached_static_lighting: bool,
    /// Counted toward the primitive's movable-point-light shader path
    pub(crate) is_movable_point_light: bool,
    /// Which of the light's two lists this edge is on
    pub(crate) on_often_moving_list: bool,

    // Intrusive links: the light's list of affected primitives
    pub(crate) prev_primitive: Option<InteractionKey>,
    pub(crate) next_primitive: Option<InteractionKey>,

    // Intrusive links: the primitive's list of affecting lights
    pub(crate) prev_light: Option<InteractionKey>,
    pub(crate) next_light: Option<InteractionKey>,
}

impl LightPrimitiveInteraction {
    /// The light endpoint's id
    pub fn light_id(&self) -> LightId {
        self.light_id
    }

    /// The primitive endpoint's key
    pub fn primitive(&self) -> PrimitiveKey {
        self.primitive
    }

    /// Whether the light applies dynamically to the primitive
    pub fn is_dynamic(&self) -> bool {
        self.is_dynamic
    }

    /// Whether the light is represented in the primitive's lightmap
    pub fn is_light_mapped(&self) -> bool {
        self.is_light_mapped
    }

    /// Whether shadowing onto the primitive is baked into a shadow map
    pub fn is_shadow_mapped(&self) -> bool {
        self.is_shadow_mapped
    }

    /// Whether this pairing produces a shadow
    pub fn casts_shadow(&self) -> bool {
        self.casts_shadow
    }

    /// Whether a dedicated translucent-object shadow applies
    pub fn has_translucent_object_shadow(&self) -> bool {
        self.has_translucent_object_shadow
    }

    /// Whether a per-object inset shadow applies
    pub fn has_inset_object_shadow(&self) -> bool {
        self.has_inset_object_shadow
    }

    /// Whether the primitive only shadows itself
    pub fn self_shadow_only(&self) -> bool {
        self.self_shadow_only
    }

    /// Whether this edge represents unbuilt static lighting
    pub fn has_uncached_static_lighting(&self) -> bool {
        self.uncached_static_lighting
    }
}

// Intrusive list surgery. Heads are passed in and returned because they live
// on LightSceneInfo / PrimitiveSceneInfo, in containers the slab borrow must
// not alias.

/// Push `key` onto the front of a light's primitive list, returning the new head.
pub(crate) fn link_into_primitive_list(
    slab: &mut InteractionSlab,
    head: Option<InteractionKey>,
    key: InteractionKey,
) -> Option<InteractionKey> {
    slab[key].prev_primitive = None;
    slab[key].next_primitive = head;
    if let Some(old_head) = head {
        slab[old_head].prev_primitive = Some(key);
    }
    Some(key)
}

/// Unlink `key` from a light's primitive list, returning the new head.
pub(crate) fn unlink_from_primitive_list(
    slab: &mut InteractionSlab,
    head: Option<InteractionKey>,
    key: InteractionKey,
) -> Option<InteractionKey> {
    let (prev, next) = {
        let edge = &slab[key];
        (edge.prev_primitive, edge.next_primitive)
    };
    if let Some(next) = next {
        slab[next].prev_primitive = prev;
    }
    match prev {
        Some(prev) => {
            slab[prev].next_primitive = next;
            head
        }
        None => {
            debug_assert_eq!(head, Some(key));
            next
        }
    }
}

/// Push `key` onto the front of a primitive's light list, returning the new head.
pub(crate) fn link_into_light_list(
    slab: &mut InteractionSlab,
    head: Option<InteractionKey>,
    key: InteractionKey,
) -> Option<InteractionKey> {
    slab[key].prev_light = None;
    slab[key].next_light = head;
    if let Some(old_head) = head {
        slab[old_head].prev_light = Some(key);
    }
    Some(key)
}

/// Unlink `key` from a primitive's light list, returning the new head.
pub(crate) fn unlink_from_light_list(
    slab: &mut InteractionSlab,
    head: Option<InteractionKey>,
    key: InteractionKey,
) -> Option<InteractionKey> {
    let (prev, next) = {
        let edge = &slab[key];
        (edge.prev_light, edge.next_light)
    };
    if let Some(next) = next {
        slab[next].prev_light = prev;
    }
    match prev {
        Some(prev) => {
            slab[prev].next_light = next;
            head
        }
        None => {
            debug_assert_eq!(head, Some(key));
            next
        }
    }
}

/// Which intrusive links an [`InteractionIter`] follows
#[derive(Clone, Copy)]
pub(crate) enum ListKind {
    /// A light's list of affected primitives
    PrimitiveList,
    /// A primitive's list of affecting lights
    LightList,
}

/// Iterator over one intrusive interaction list
pub struct InteractionIter<'a> {
    slab: &'a InteractionSlab,
    current: Option<InteractionKey>,
    kind: ListKind,
}

impl<'a> InteractionIter<'a> {
    pub(crate) fn new(
        slab: &'a InteractionSlab,
        head: Option<InteractionKey>,
        kind: ListKind,
    ) -> Self {
        Self {
            slab,
            current: head,
            kind,
        }
    }
}

impl<'a> Iterator for InteractionIter<'a> {
    type Item = (InteractionKey, &'a LightPrimitiveInteraction);

    fn next(&mut self) -> Option<Self::Item> {
        let key = self.current?;
        let edge = &self.slab[key];
        self.current = match self.kind {
            ListKind::PrimitiveList => edge.next_primitive,
            ListKind::LightList => edge.next_light,
        };
        Some((key, edge))
    }
}
