//! Ports: typed connection endpoints and the declaration grammars.
//!
//! Each element's wiring is an immutable [`Ports`] table installed once flow
//! resolution finishes. The data path reads it through an `arc-swap` load, so
//! forwarding a packet costs one lock-free pointer read plus the peer's
//! element lock — no global structures are touched.

use tracing::trace;

use crate::element::ElementHandle;
use crate::packet::Packet;

/// Concrete data-movement discipline of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discipline {
    /// The producer calls the consumer.
    Push,
    /// The consumer calls the producer.
    Pull,
    /// Not yet resolved; must not survive flow analysis.
    Agnostic,
}

impl Discipline {
    fn from_code(c: char) -> Option<Discipline> {
        match c {
            'h' => Some(Discipline::Push),
            'l' => Some(Discipline::Pull),
            'a' => Some(Discipline::Agnostic),
            _ => None,
        }
    }
}

/// Parsed processing declaration: per-port disciplines for each side, with
/// the last code repeating.
#[derive(Debug, Clone)]
pub struct Processing {
    inputs: Vec<Discipline>,
    outputs: Vec<Discipline>,
}

impl Processing {
    /// Parse a processing string: a keyword (`PUSH`, `PULL`, `AGNOSTIC`) or
    /// `codes/codes` with codes from `h`, `l`, `a`.
    pub fn parse(s: &str) -> Result<Processing, String> {
        let normalized = match s {
            "PUSH" => "h/h",
            "PULL" => "l/l",
            "AGNOSTIC" => "a/a",
            other => other,
        };
        let (ins, outs) = normalized
            .split_once('/')
            .ok_or_else(|| format!("bad processing string '{s}': missing '/'"))?;
        let side = |codes: &str| -> Result<Vec<Discipline>, String> {
            if codes.is_empty() {
                return Err(format!("bad processing string '{s}': empty side"));
            }
            codes
                .chars()
                .map(|c| {
                    Discipline::from_code(c)
                        .ok_or_else(|| format!("bad processing code '{c}' in '{s}'"))
                })
                .collect()
        };
        Ok(Processing {
            inputs: side(ins)?,
            outputs: side(outs)?,
        })
    }

    /// Declared discipline of input `port`.
    pub fn input(&self, port: usize) -> Discipline {
        *self
            .inputs
            .get(port)
            .unwrap_or_else(|| self.inputs.last().expect("side is non-empty"))
    }

    /// Declared discipline of output `port`.
    pub fn output(&self, port: usize) -> Discipline {
        *self
            .outputs
            .get(port)
            .unwrap_or_else(|| self.outputs.last().expect("side is non-empty"))
    }
}

/// Parsed port-count declaration: allowed ranges for each side.
#[derive(Debug, Clone, Copy)]
pub struct PortCount {
    min_inputs: usize,
    max_inputs: Option<usize>,
    min_outputs: usize,
    max_outputs: Option<usize>,
}

fn parse_count_side(side: &str, whole: &str) -> Result<(usize, Option<usize>), String> {
    if side == "-" {
        return Ok((0, None));
    }
    if let Some((lo, hi)) = side.split_once('-') {
        let lo: usize = lo
            .parse()
            .map_err(|_| format!("bad port count '{whole}'"))?;
        if hi.is_empty() {
            return Ok((lo, None));
        }
        let hi: usize = hi
            .parse()
            .map_err(|_| format!("bad port count '{whole}'"))?;
        if hi < lo {
            return Err(format!("bad port count '{whole}': empty range"));
        }
        return Ok((lo, Some(hi)));
    }
    let n: usize = side
        .parse()
        .map_err(|_| format!("bad port count '{whole}'"))?;
    Ok((n, Some(n)))
}

impl PortCount {
    /// Parse a port-count string: `"1/1"`, `"0/1"`, `"-/1"`, `"1/2-"`,
    /// `"1/1-4"`.
    pub fn parse(s: &str) -> Result<PortCount, String> {
        let (ins, outs) = s
            .split_once('/')
            .ok_or_else(|| format!("bad port count '{s}': missing '/'"))?;
        let (min_inputs, max_inputs) = parse_count_side(ins, s)?;
        let (min_outputs, max_outputs) = parse_count_side(outs, s)?;
        Ok(PortCount {
            min_inputs,
            max_inputs,
            min_outputs,
            max_outputs,
        })
    }

    /// Check an actual port usage against the declaration.
    pub fn check(&self, ninputs: usize, noutputs: usize) -> Result<(), String> {
        let side = |n: usize, min: usize, max: Option<usize>, what: &str| {
            if n < min {
                Err(format!("too few {what} ({n}, need at least {min})"))
            } else if max.is_some_and(|m| n > m) {
                Err(format!(
                    "too many {what} ({n}, at most {})",
                    max.expect("checked")
                ))
            } else {
                Ok(())
            }
        };
        side(ninputs, self.min_inputs, self.max_inputs, "inputs")?;
        side(noutputs, self.min_outputs, self.max_outputs, "outputs")
    }
}

pub(crate) struct Link {
    pub(crate) peer: ElementHandle,
    pub(crate) port: usize,
}

/// An input endpoint: on a pull input, `pull()` asks the upstream peer.
pub struct InputPort {
    link: Option<Link>,
    discipline: Discipline,
}

impl InputPort {
    pub(crate) fn new(link: Option<Link>, discipline: Discipline) -> InputPort {
        InputPort { link, discipline }
    }

    /// Resolved discipline of this port.
    #[inline]
    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    /// True if this input was resolved to pull.
    #[inline]
    pub fn is_pull(&self) -> bool {
        self.discipline == Discipline::Pull
    }

    /// True if the port is wired to a peer.
    #[inline]
    pub fn connected(&self) -> bool {
        self.link.is_some()
    }

    /// Request a packet from the upstream peer. `None` means nothing is
    /// available (or the port is unconnected).
    #[inline]
    pub fn pull(&self) -> Option<Packet> {
        let link = self.link.as_ref()?;
        link.peer.pull(link.port)
    }
}

/// An output endpoint: on a push output, `push()` hands the packet to the
/// downstream peer synchronously.
pub struct OutputPort {
    link: Option<Link>,
    discipline: Discipline,
}

impl OutputPort {
    pub(crate) fn new(link: Option<Link>, discipline: Discipline) -> OutputPort {
        OutputPort { link, discipline }
    }

    /// Resolved discipline of this port.
    #[inline]
    pub fn discipline(&self) -> Discipline {
        self.discipline
    }

    /// True if this output was resolved to push.
    #[inline]
    pub fn is_push(&self) -> bool {
        self.discipline == Discipline::Push
    }

    /// True if the port is wired to a peer.
    #[inline]
    pub fn connected(&self) -> bool {
        self.link.is_some()
    }

    /// Forward a packet to the downstream peer. An unconnected output kills
    /// the packet.
    #[inline]
    pub fn push(&self, packet: Packet) {
        match &self.link {
            Some(link) => link.peer.push(link.port, packet),
            None => {
                trace!("push to unconnected output, dropping");
                packet.kill();
            }
        }
    }
}

/// An element's complete wiring: created by the router after flow
/// resolution, immutable for the router's lifetime.
pub struct Ports {
    inputs: Vec<InputPort>,
    outputs: Vec<OutputPort>,
}

impl Ports {
    /// The wiring of a detached element: no ports on either side. Useful for
    /// exercising elements outside a router.
    pub fn empty() -> Ports {
        Ports {
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub(crate) fn new(inputs: Vec<InputPort>, outputs: Vec<OutputPort>) -> Ports {
        Ports { inputs, outputs }
    }

    /// Number of connected inputs.
    #[inline]
    pub fn ninputs(&self) -> usize {
        self.inputs.len()
    }

    /// Number of connected outputs.
    #[inline]
    pub fn noutputs(&self) -> usize {
        self.outputs.len()
    }

    /// Input port `i`. Panics on an out-of-range index: port ranges are
    /// validated at build time, so this is a contract violation.
    #[inline]
    pub fn input(&self, i: usize) -> &InputPort {
        &self.inputs[i]
    }

    /// Output port `i`. Panics on an out-of-range index.
    #[inline]
    pub fn output(&self, i: usize) -> &OutputPort {
        &self.outputs[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_keywords() {
        let p = Processing::parse("PUSH").unwrap();
        assert_eq!(p.input(0), Discipline::Push);
        assert_eq!(p.output(3), Discipline::Push);
        let p = Processing::parse("PULL").unwrap();
        assert_eq!(p.input(0), Discipline::Pull);
        let p = Processing::parse("AGNOSTIC").unwrap();
        assert_eq!(p.output(0), Discipline::Agnostic);
    }

    #[test]
    fn test_processing_per_port_codes() {
        let p = Processing::parse("a/ah").unwrap();
        assert_eq!(p.input(0), Discipline::Agnostic);
        assert_eq!(p.output(0), Discipline::Agnostic);
        assert_eq!(p.output(1), Discipline::Push);
        // Last code repeats.
        assert_eq!(p.output(2), Discipline::Push);
    }

    #[test]
    fn test_processing_rejects_garbage() {
        assert!(Processing::parse("x/h").is_err());
        assert!(Processing::parse("h").is_err());
        assert!(Processing::parse("/h").is_err());
    }

    #[test]
    fn test_port_count_forms() {
        let pc = PortCount::parse("1/1").unwrap();
        assert!(pc.check(1, 1).is_ok());
        assert!(pc.check(0, 1).is_err());
        assert!(pc.check(1, 2).is_err());

        let pc = PortCount::parse("-/1").unwrap();
        assert!(pc.check(0, 1).is_ok());
        assert!(pc.check(9, 1).is_ok());

        let pc = PortCount::parse("1/2-").unwrap();
        assert!(pc.check(1, 2).is_ok());
        assert!(pc.check(1, 5).is_ok());
        assert!(pc.check(1, 1).is_err());

        let pc = PortCount::parse("1/1-4").unwrap();
        assert!(pc.check(1, 4).is_ok());
        assert!(pc.check(1, 5).is_err());
    }

    #[test]
    fn test_port_count_rejects_garbage() {
        assert!(PortCount::parse("1").is_err());
        assert!(PortCount::parse("x/1").is_err());
        assert!(PortCount::parse("3-1/1").is_err());
    }
}
