// Wait line - per-side bookkeeping of blocked threads
//
// Every side counts its parked threads. In FIFO-fair mode a side also keeps
// tickets in arrival order; only the head ticket may proceed.

use std::collections::VecDeque;

pub(crate) type Ticket = u64;

#[derive(Debug, Default)]
pub(crate) struct WaitLine {
    tickets: VecDeque<Ticket>,
    next_ticket: Ticket,
    parked: usize,
}

impl WaitLine {
    /// Take a ticket at the back of the line
    pub(crate) fn join(&mut self) -> Ticket {
        let ticket = self.next_ticket;
        self.next_ticket = self.next_ticket.wrapping_add(1);
        self.tickets.push_back(ticket);
        ticket
    }

    pub(crate) fn is_head(&self, ticket: Ticket) -> bool {
        self.tickets.front() == Some(&ticket)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Remove a ticket wherever it stands; returns true if it was the head
    pub(crate) fn leave(&mut self, ticket: Ticket) -> bool {
        match self.tickets.iter().position(|t| *t == ticket) {
            Some(index) => {
                self.tickets.remove(index);
                index == 0
            }
            None => false,
        }
    }

    pub(crate) fn park(&mut self) {
        self.parked += 1;
    }

    pub(crate) fn unpark(&mut self) {
        self.parked -= 1;
    }

    /// Threads currently blocked on this side
    pub(crate) fn parked(&self) -> usize {
        self.parked
    }
}
