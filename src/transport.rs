use reconcile::{Event, Transport};

/// Transport writing every live event to the diagnostic log.
pub struct LogTransport;

impl Transport for LogTransport {
    fn emit(&self, event: Event) {
        match event {
            Event::InstructionStatus {
                instruction,
                status,
                info,
                ..
            } => log::info!("instruction {instruction} {status}: {info}"),
            Event::GroupStatus { group, status } => log::info!("group {group} {status}"),
            Event::Log(entry) => log::info!("{}", entry.message),
        }
    }
}
