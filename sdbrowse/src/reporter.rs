//! Renders lifecycle events as human-readable lines.

use std::fmt;

use crate::client::Milestone;
use crate::types::{LookupFlags, ResolutionResult, ServiceInstance};
use shared::error::Error;

/// One reportable event.
#[derive(Debug)]
pub enum Report<'a> {
    SessionFailure(&'a str),
    BrowserFailure(&'a str),
    InstanceAdded(&'a ServiceInstance, LookupFlags),
    /// The instance, its flags and the name of its interface, if known.
    InstanceRemoved(&'a ServiceInstance, LookupFlags, Option<&'a str>),
    Milestone(Milestone),
    ResolveStartFailed(&'a ServiceInstance, &'a Error),
    Resolved(&'a ResolutionResult),
    ResolveFailed(&'a ServiceInstance, &'a str),
}

impl Report<'_> {
    pub fn level(&self) -> log::Level {
        match self {
            Report::SessionFailure(_) | Report::BrowserFailure(_) => log::Level::Error,
            Report::ResolveStartFailed(..) | Report::ResolveFailed(..) => log::Level::Warn,
            Report::Milestone(_) => log::Level::Debug,
            _ => log::Level::Info,
        }
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::SessionFailure(reason) => {
                write!(f, "(Session) Server connection failure: {reason}")
            }
            Report::BrowserFailure(reason) => write!(f, "(Browser) FAILURE: {reason}"),
            Report::InstanceAdded(instance, flags) => write!(
                f,
                "(Browser) NEW: service '{}' of type '{}' in domain '{}' ifindex={} protocol={} flags={}",
                instance.name,
                instance.service_type,
                instance.domain,
                instance.interface,
                instance.protocol,
                flags
            ),
            Report::InstanceRemoved(instance, flags, interface) => {
                write!(
                    f,
                    "(Browser) REMOVE: service '{}' of type '{}' in domain '{}' if=",
                    instance.name, instance.service_type, instance.domain,
                )?;
                match interface {
                    Some(name) => write!(f, "{name}")?,
                    None => write!(f, "{}", instance.interface)?,
                }
                write!(f, " flags={flags}")
            }
            Report::Milestone(milestone) => write!(f, "(Browser) {milestone}"),
            Report::ResolveStartFailed(instance, err) => write!(
                f,
                "(Browser) Failed to resolve service '{}': {err}",
                instance.name
            ),
            Report::Resolved(result) => write!(
                f,
                "(Resolver) Service '{}' of type '{}' in domain '{}' {}:{} {} TXT={} flags={}",
                result.instance.name,
                result.instance.service_type,
                result.instance.domain,
                result.host_name,
                result.port,
                result.address,
                result.txt,
                result.flags
            ),
            Report::ResolveFailed(instance, reason) => write!(
                f,
                "(Resolver) Failed to resolve service '{}' of type '{}' in domain '{}': {reason}",
                instance.name, instance.service_type, instance.domain
            ),
        }
    }
}

/// Destination of rendered reports.
pub trait Reporter {
    fn report(&mut self, report: &Report<'_>);
}

/// Writes every report through the `log` facade.
#[derive(Debug, Default, Copy, Clone)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&mut self, report: &Report<'_>) {
        log::log!(report.level(), "{report}");
    }
}
