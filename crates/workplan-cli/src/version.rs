pub const FULL: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "+git.",
    env!("WORKPLAN_GIT_COUNT"),
    ".",
    env!("WORKPLAN_GIT_SHA"),
    env!("WORKPLAN_GIT_DIRTY")
);
