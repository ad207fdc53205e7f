/// Decides when reaching the end of the list should load another page.
///
/// Fires once each time the last rendered post goes from hidden to visible.
/// While a fetch is running or nothing is left to load, observations are
/// not recorded, so a post that is still visible afterwards fires then.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct VisibilityTrigger {
    visible: bool,
}

impl VisibilityTrigger {
    pub fn observe(&mut self, visible: bool, loading: bool, has_more: bool) -> bool {
        if loading || !has_more {
            return false;
        }

        let entered = visible && !self.visible;
        self.visible = visible;
        entered
    }

    /// Forget the last observation, e.g. after another post became the last one.
    pub fn reset(&mut self) {
        self.visible = false;
    }
}
