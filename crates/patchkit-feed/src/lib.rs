mod feed;
mod identity;
mod nuspec;

pub use feed::{most_recent_package, PackageFeed, PackageInfo};
pub use identity::{
    is_package_file, is_symbols_package, parse_package_file_name, parse_package_version,
    PackageFileName,
};
pub use nuspec::{parse_nuspec_identity, read_nuspec_identity, NuspecIdentity};

#[cfg(test)]
mod tests;
