//! Greeting templates shown in rooms with no saved code.

use crate::protocol::Language;

const JAVASCRIPT: &str = "// Welcome to CodeShare!

// Write your code here and share it with others using the room ID.
// Try writing a simple program, like:

console.log(\"Hello, collaborative coding world!\");";

const PYTHON: &str = "# Welcome to CodeShare!

# Write your code here and share it with others using the room ID.
# Try writing a simple program, like:

print(\"Hello, collaborative coding world!\")";

const JAVA: &str = "// Welcome to CodeShare!

// Write your code here and share it with others using the room ID.
public class Main {
    public static void main(String[] args) {
        System.out.println(\"Hello, collaborative coding world!\");
    }
}";

const CPP: &str = "// Welcome to CodeShare!

// Write your code here and share it with others using the room ID.
#include <iostream>

int main() {
    std::cout << \"Hello, collaborative coding world!\" << std::endl;
    return 0;
}";

const RUBY: &str = "# Welcome to CodeShare!

# Write your code here and share it with others using the room ID.
def greet
  puts \"Hello, collaborative coding world!\"
end

greet";

const GO: &str = "// Welcome to CodeShare!

// Write your code here and share it with others using the room ID.
package main

import \"fmt\"

func main() {
\tfmt.Println(\"Hello, collaborative coding world!\")
}";

/// Template for `language`; unknown languages get the JavaScript one.
pub fn default_template(language: &Language) -> String {
    match language {
        Language::JavaScript | Language::Other(_) => JAVASCRIPT,
        Language::Python => PYTHON,
        Language::Java => JAVA,
        Language::Cpp => CPP,
        Language::Ruby => RUBY,
        Language::Go => GO,
    }
    .to_string()
}
