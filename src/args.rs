//! Argument assembly for the external tools driven by the pipeline.

/// How a flag and its value are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagValueStyle {
    /// `--flag value`
    Separate,
    /// `--flag=value`
    Equals,
}

/// Builder shared by the debootstrap, mksquashfs, grub-mkstandalone and
/// xorriso invocations.
#[derive(Debug, Default)]
pub struct CommandArgsBuilder {
    args: Vec<String>,
}

impl CommandArgsBuilder {
    pub fn new() -> Self {
        Self { args: Vec::new() }
    }

    /// Appends a positional argument.
    pub fn push_arg(&mut self, arg: impl Into<String>) {
        self.args.push(arg.into());
    }

    /// Appends several positional arguments in order.
    pub fn push_args<I, S>(&mut self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
    }

    pub fn push_flag(&mut self, flag: &str) {
        self.args.push(flag.to_string());
    }

    /// Appends `flag` only when `enabled` is true.
    pub fn push_flag_if(&mut self, flag: &str, enabled: bool) {
        if enabled {
            self.push_flag(flag);
        }
    }

    /// Appends a flag with its value; empty values are skipped.
    pub fn push_flag_value(&mut self, flag: &str, value: &str, style: FlagValueStyle) {
        if value.is_empty() {
            return;
        }
        match style {
            FlagValueStyle::Separate => {
                self.args.push(flag.to_string());
                self.args.push(value.to_string());
            }
            FlagValueStyle::Equals => self.args.push(format!("{}={}", flag, value)),
        }
    }

    pub fn into_args(self) -> Vec<String> {
        self.args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_both_styles_and_skips_empty_values() {
        let mut b = CommandArgsBuilder::new();
        b.push_flag_value("--variant", "minbase", FlagValueStyle::Equals);
        b.push_flag_value("-comp", "xz", FlagValueStyle::Separate);
        b.push_flag_value("--include", "", FlagValueStyle::Equals);
        b.push_flag_if("-no-xattrs", false);
        b.push_flag_if("-noappend", true);
        assert_eq!(b.into_args(), ["--variant=minbase", "-comp", "xz", "-noappend"]);
    }

    #[test]
    fn positional_arguments_keep_order() {
        let mut b = CommandArgsBuilder::new();
        b.push_flag("-noappend");
        b.push_args(["noble", "/work/chroot"]);
        b.push_arg("http://archive.ubuntu.com/ubuntu/");
        assert_eq!(
            b.into_args(),
            ["-noappend", "noble", "/work/chroot", "http://archive.ubuntu.com/ubuntu/"]
        );
    }
}
