//! Domain entities: requests, pool invites, invoices, and users.

pub mod invite;
pub mod invoice;
pub mod request;
pub mod user;

pub use invite::{InviteStatus, PoolInvite};
pub use invoice::{Invoice, InvoiceId, InvoiceStatus};
pub use request::{NewRequest, Offering, Request, RequestId, RequestStatus};
pub use user::{Actor, AdminData, ClientData, ExpertData, Role, RoleProfile, User, UserId};
