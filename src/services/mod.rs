pub mod billing;
pub mod orgs;
pub mod repos;

pub use billing::BillingService;
pub use orgs::OrgService;
pub use repos::RepoService;
