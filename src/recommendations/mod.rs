//! Recommendation emails built from the trending list.

mod dispatcher;
mod email;
mod fanout;

pub use dispatcher::{
    render_message, DispatchError, DispatchOutcome, DispatchPayload, RecommendationDispatcher,
};
pub use email::{
    create_email_sender, EmailError, EmailMessage, EmailSender, LogEmailSender, SmtpEmailSender,
};
pub use fanout::{dispatch_job_id, RecommendationFanout};
