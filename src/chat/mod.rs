pub mod history;
pub mod message;
pub mod session;

pub use history::ConversationHistory;
pub use message::{Message, Role};
pub use session::{ChatSession, Publisher, TurnEnd, TurnEvent, TurnOutcome, TurnState, CURSOR};
