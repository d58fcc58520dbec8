mod controls;
mod state;

pub use controls::{render_field, Control};
pub use state::{
    compute_defaults, Completion, FieldError, FormError, FormState, PendingSubmission,
    RequestState, GENERATION_FAILED_MESSAGE, NO_IMAGES_MESSAGE, PROMPT_REQUIRED_MESSAGE,
    REQUIRED_PARAMETER, SEED_PARAMETER, SEED_RANGE, STREAMING_KEY,
};
