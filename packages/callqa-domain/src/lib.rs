pub mod audio;
pub mod identity;
pub mod recovery;
pub mod status;

pub use audio::{AudioRef, SignedAudioUrl};
pub use identity::{AuthContext, Claims, Identity, OrgMembership, Role, TokenError};
pub use status::{BulkAction, CallStatus, TransitionError};
