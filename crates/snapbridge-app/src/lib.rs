// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod ids;
pub mod model;
pub mod sequence;
pub mod session;
pub mod timebucket;

pub use ids::*;
pub use model::*;
pub use sequence::*;
pub use session::*;
pub use timebucket::*;
