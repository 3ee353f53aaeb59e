use super::{topology::CoordinatorGroup, CommError, Communicator, Message};
use crate::{archive::Archive, worker::Outcome};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Communication(#[from] CommError),
    #[error("Unexpected message from rank {from}: {message:?}")]
    Protocol { from: usize, message: Message },
}

enum Mode {
    /// the lead is the only representative and processes everything itself
    Local,
    /// the lead only hands out work
    Remote { running: usize, stopped: usize, workers: usize },
}

/// Lead side of the work distribution.
/// Yields one outcome per archive, in the order the outcomes arrive.
pub struct Dispatch<'c, C, F> {
    comm: &'c C,
    pending: VecDeque<Archive>,
    process: F,
    mode: Mode,
    fused: bool,
}

/// Hand out `archives` to the coordinator group, to be called on the lead only.
pub fn dispatch<'c, C, F>(
    comm: &'c C,
    group: &CoordinatorGroup,
    archives: Vec<Archive>,
    process: F,
) -> Dispatch<'c, C, F>
where
    C: Communicator,
    F: FnMut(&Archive) -> Outcome,
{
    let mode = if group.size() == 1 {
        Mode::Local
    } else {
        info!(
            "Distributing {} archives over {} workers",
            archives.len(),
            group.size() - 1
        );
        Mode::Remote {
            running: 0,
            stopped: 0,
            workers: group.size() - 1,
        }
    };

    Dispatch {
        comm,
        pending: archives.into(),
        process,
        mode,
        fused: false,
    }
}

impl<'c, C, F> Dispatch<'c, C, F>
where
    C: Communicator,
    F: FnMut(&Archive) -> Outcome,
{
    /// answer a work request with the next archive, or stop the worker
    fn hand_out(&mut self, to: usize) -> Result<(), DispatchError> {
        let Mode::Remote {
            running, stopped, ..
        } = &mut self.mode
        else {
            return Ok(());
        };

        match self.pending.pop_front() {
            Some(archive) => {
                debug!(rank = to, archive = %archive, "Assigning archive");
                self.comm.send(to, Message::Assign(archive))?;
                *running += 1;
            }
            None => {
                debug!(rank = to, "No work left, stopping worker");
                self.comm.send(to, Message::Stop)?;
                *stopped += 1;
            }
        }

        Ok(())
    }

    fn next_remote(&mut self) -> Option<Result<(Archive, Outcome), DispatchError>> {
        loop {
            if let Mode::Remote {
                stopped, workers, ..
            } = self.mode
            {
                if stopped == workers {
                    return None;
                }
            }

            let (from, message) = match self.comm.receive_any() {
                Ok(received) => received,
                Err(error) => return Some(Err(error.into())),
            };

            match message {
                Message::Ready => {
                    if let Err(error) = self.hand_out(from) {
                        return Some(Err(error));
                    }
                }
                Message::Finished { archive, outcome } => {
                    if let Mode::Remote { running, .. } = &mut self.mode {
                        *running = running.saturating_sub(1);
                    }

                    return Some(self.hand_out(from).map(|_| (archive, outcome)));
                }
                message => return Some(Err(DispatchError::Protocol { from, message })),
            }
        }
    }
}

impl<'c, C, F> Iterator for Dispatch<'c, C, F>
where
    C: Communicator,
    F: FnMut(&Archive) -> Outcome,
{
    type Item = Result<(Archive, Outcome), DispatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }

        let item = match self.mode {
            Mode::Local => self.pending.pop_front().map(|archive| {
                let outcome = (self.process)(&archive);
                Ok((archive, outcome))
            }),
            Mode::Remote { .. } => self.next_remote(),
        };

        if matches!(item, Some(Err(_))) {
            self.fused = true;
        }

        item
    }
}

/// Worker side of the work distribution: request archives from the lead until told to stop.
/// Returns the number of archives processed.
pub fn serve<C, F>(comm: &C, group: &CoordinatorGroup, mut process: F) -> Result<usize, DispatchError>
where
    C: Communicator,
    F: FnMut(&Archive) -> Outcome,
{
    let lead = group.lead();
    let mut processed = 0;

    comm.send(lead, Message::Ready)?;

    loop {
        match comm.receive_any()? {
            (from, Message::Assign(archive)) if from == lead => {
                let outcome = process(&archive);
                processed += 1;
                comm.send(lead, Message::Finished { archive, outcome })?;
            }
            (from, Message::Stop) if from == lead => return Ok(processed),
            (from, message) => return Err(DispatchError::Protocol { from, message }),
        }
    }
}
